//! Errors raised while building mail content.

/// Shorthand for results carrying [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Failure while handling MIME data.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A `Content-Type` value without a `type/subtype` essence.
    #[error("malformed media type {0:?}")]
    InvalidContentType(String),
}
