pub mod error;
pub mod readable;
pub mod tee;

// Re-export main types
pub use error::*;
pub use readable::*;
pub use tee::*;

pub type StreamResult<T> = Result<T, StreamError>;

/// Generic queuing strategy trait
pub trait QueuingStrategy<T> {
    /// Return the size of the chunk.
    ///
    /// An error here errors the stream and is handed back to the caller of
    /// `enqueue`. Strategies without a size function count every chunk as 1.
    fn size(&self, chunk: &T) -> StreamResult<f64> {
        let _ = chunk;
        Ok(1.0)
    }

    /// Return high water mark (desired max queue size)
    fn high_water_mark(&self) -> f64;
}

/// Count-based strategy
#[derive(Clone, Debug)]
pub struct CountQueuingStrategy {
    high_water_mark: f64,
}

impl CountQueuingStrategy {
    pub const fn new(high_water_mark: f64) -> Self {
        Self { high_water_mark }
    }
}

impl Default for CountQueuingStrategy {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl<T> QueuingStrategy<T> for CountQueuingStrategy {
    fn high_water_mark(&self) -> f64 {
        self.high_water_mark
    }
}

/// Byte length strategy for types with known byte sizes
#[derive(Clone, Debug)]
pub struct ByteLengthQueuingStrategy {
    high_water_mark: f64,
}

impl ByteLengthQueuingStrategy {
    pub const fn new(high_water_mark: f64) -> Self {
        Self { high_water_mark }
    }
}

impl QueuingStrategy<Vec<u8>> for ByteLengthQueuingStrategy {
    fn size(&self, chunk: &Vec<u8>) -> StreamResult<f64> {
        Ok(chunk.len() as f64)
    }

    fn high_water_mark(&self) -> f64 {
        self.high_water_mark
    }
}

impl QueuingStrategy<String> for ByteLengthQueuingStrategy {
    fn size(&self, chunk: &String) -> StreamResult<f64> {
        Ok(chunk.len() as f64)
    }

    fn high_water_mark(&self) -> f64 {
        self.high_water_mark
    }
}

/// Strategy backed by a caller-supplied size function.
#[derive(Clone)]
pub struct SizeFnQueuingStrategy<F> {
    high_water_mark: f64,
    size: F,
}

impl<F> SizeFnQueuingStrategy<F> {
    pub const fn new(high_water_mark: f64, size: F) -> Self {
        Self {
            high_water_mark,
            size,
        }
    }
}

impl<T, F> QueuingStrategy<T> for SizeFnQueuingStrategy<F>
where
    F: Fn(&T) -> StreamResult<f64>,
{
    fn size(&self, chunk: &T) -> StreamResult<f64> {
        (self.size)(chunk)
    }

    fn high_water_mark(&self) -> f64 {
        self.high_water_mark
    }
}

pub(crate) fn validate_high_water_mark(high_water_mark: f64) -> StreamResult<f64> {
    if high_water_mark.is_nan() || high_water_mark < 0.0 {
        return Err(StreamError::range(format!(
            "highWaterMark must be a non-negative number, got {high_water_mark}"
        )));
    }
    Ok(high_water_mark)
}

pub(crate) fn validate_chunk_size(size: f64) -> StreamResult<f64> {
    if !size.is_finite() || size < 0.0 {
        return Err(StreamError::range(format!(
            "chunk size must be a finite, non-negative number, got {size}"
        )));
    }
    Ok(size)
}
