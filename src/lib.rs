//! Pull-based readable streams with backpressure, exclusive readers and tee.
//!
//! Each stream is driven by a future the caller spawns on the executor of its
//! choice, see [`ReadableStreamBuilder::spawn`] and [`TeeBuilder::spawn`].

pub mod platform;
pub mod streams;

pub use streams::*;
