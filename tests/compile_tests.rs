/// Compile-time checks that Send/Sync bounds hold for each feature
///
/// Run with:
///   cargo test --features send  (default)
///   cargo test --no-default-features --features local
use readable_streams::{
    IteratorSource, ReadableStream, ReadableStreamDefaultController, ReadableStreamDefaultReader,
    TeeSource,
};

type VecStream = ReadableStream<i32, IteratorSource<std::vec::IntoIter<i32>>>;

#[cfg(feature = "send")]
fn assert_send<T: Send>() {}

#[cfg(feature = "send")]
fn assert_sync<T: Sync>() {}

#[cfg(feature = "send")]
#[test]
fn send_feature_handles_are_send_sync() {
    assert_send::<VecStream>();
    assert_sync::<VecStream>();

    assert_send::<ReadableStreamDefaultController<i32>>();
    assert_sync::<ReadableStreamDefaultController<i32>>();

    assert_send::<ReadableStreamDefaultReader<i32, IteratorSource<std::vec::IntoIter<i32>>>>();
    assert_sync::<ReadableStreamDefaultReader<i32, IteratorSource<std::vec::IntoIter<i32>>>>();

    assert_send::<ReadableStream<i32, TeeSource<i32>>>();
    assert_send::<TeeSource<i32>>();
}

#[cfg(feature = "local")]
#[test]
fn local_feature_accepts_non_send_chunks() {
    use std::rc::Rc;

    let (stream, _driver) = ReadableStream::from_vec(vec![Rc::new(1), Rc::new(2)])
        .prepare()
        .unwrap();
    assert!(!stream.locked());
}

#[test]
fn types_are_exported() {
    let _: Option<VecStream> = None;
    let _: Option<ReadableStreamDefaultController<u8>> = None;
}
