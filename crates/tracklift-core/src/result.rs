//! Result type aliases for Tracklift.

use crate::TrackliftError;

/// A specialized `Result` type for Tracklift operations.
pub type TrackliftResult<T> = Result<T, TrackliftError>;

/// A boxed future returning a `TrackliftResult`.
pub type BoxFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = TrackliftResult<T>> + Send + 'a>>;
