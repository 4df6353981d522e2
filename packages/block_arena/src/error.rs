use thiserror::Error;

/// Errors that can occur when allocating from an arena.
///
/// There is exactly one failure mode: the backend could not provide memory. The arena never
/// retries and never reports partial success, so the caller decides whether to try a smaller
/// request, fail the enclosing operation or give up.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The backend allocator could not satisfy the request.
    #[error("backend allocator could not satisfy the request")]
    Exhausted,
}

/// A specialized `Result` type for arena operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
