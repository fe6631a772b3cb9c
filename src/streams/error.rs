use std::{error::Error, fmt, sync::Arc};
use thiserror::Error;

/// Errors surfaced by streams, controllers and readers.
///
/// `Type` and `Range` are raised synchronously for misuse and bad configuration.
/// Everything a source or caller uses to error a stream travels as `Other` and is
/// replayed unchanged to every later read, `closed()` and cancel.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Operation invoked in a state that does not allow it.
    #[error("TypeError: {0}")]
    Type(String),

    /// Invalid high-water mark, chunk size or source type.
    #[error("RangeError: {0}")]
    Range(String),

    /// The driver task went away while an operation was waiting on it.
    #[error("Stream task was dropped")]
    TaskDropped,

    #[error("{0}")]
    Other(Arc<dyn Error + Send + Sync>),
}

impl StreamError {
    /// Wrap any error type into `StreamError`
    pub fn other<E>(e: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        StreamError::Other(Arc::new(e))
    }

    /// Wrap a boxed error
    pub fn other_boxed(e: Box<dyn Error + Send + Sync>) -> Self {
        StreamError::Other(e.into())
    }

    pub(crate) fn usage(message: impl Into<String>) -> Self {
        StreamError::Type(message.into())
    }

    pub(crate) fn range(message: impl Into<String>) -> Self {
        StreamError::Range(message.into())
    }

    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::Type(_))
    }

    pub fn is_range_error(&self) -> bool {
        matches!(self, Self::Range(_))
    }
}

#[derive(Debug)]
struct SimpleError(String);

impl fmt::Display for SimpleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for SimpleError {}

impl From<&str> for StreamError {
    fn from(s: &str) -> Self {
        StreamError::Other(Arc::new(SimpleError(s.to_string())))
    }
}

impl From<String> for StreamError {
    fn from(s: String) -> Self {
        StreamError::Other(Arc::new(SimpleError(s)))
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::Other(Arc::new(e))
    }
}

impl From<Box<dyn Error + Send + Sync>> for StreamError {
    fn from(e: Box<dyn Error + Send + Sync>) -> Self {
        StreamError::Other(e.into())
    }
}

/// Macro for users to add direct `From` implementations for their error types.
/// This allows using `?` directly without `.map_err(StreamError::other)`.
///
/// # Example
/// ```rust
/// use readable_streams::{StreamError, impl_stream_error_from};
///
/// #[derive(Debug)]
/// struct ParseFailure;
///
/// impl std::fmt::Display for ParseFailure {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "parse failure")
///     }
/// }
///
/// impl std::error::Error for ParseFailure {}
///
/// impl_stream_error_from!(ParseFailure);
///
/// fn example() -> Result<(), StreamError> {
///     Err(ParseFailure)?;
///     Ok(())
/// }
///
/// assert_eq!(example().unwrap_err().to_string(), "parse failure");
/// ```
#[macro_export]
macro_rules! impl_stream_error_from {
    ($($error_type:ty),* $(,)?) => {
        $(
            impl From<$error_type> for $crate::streams::error::StreamError {
                fn from(e: $error_type) -> Self {
                    $crate::streams::error::StreamError::Other(std::sync::Arc::new(e))
                }
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_errors_display_their_message() {
        let err: StreamError = "boom".into();
        assert_eq!(err.to_string(), "boom");
        assert!(!err.is_usage_error());
    }

    #[test]
    fn usage_and_range_errors_are_tagged() {
        let usage = StreamError::usage("stream is locked");
        assert!(usage.is_usage_error());
        assert_eq!(usage.to_string(), "TypeError: stream is locked");

        let range = StreamError::range("bad size");
        assert!(range.is_range_error());
        assert_eq!(range.to_string(), "RangeError: bad size");
    }

    #[test]
    fn clones_share_the_wrapped_error() {
        let err = StreamError::from(std::io::Error::other("disk gone"));
        let clone = err.clone();
        match (&err, &clone) {
            (StreamError::Other(a), StreamError::Other(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected Other variants"),
        }
    }
}
