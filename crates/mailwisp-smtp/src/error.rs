//! Failures surfaced by connections, clients and senders.

use std::io;
use std::sync::Arc;

use crate::types::AuthMechanism;

/// Shorthand for results carrying [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
///
/// Errors are `Clone` because a connection failure is delivered to every
/// request that was waiting on that connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Hostname cannot be used as a TLS server name.
    #[error("Invalid hostname: {0}")]
    InvalidHostname(String),

    /// The stream ended while a reply was expected, or the connection was closed.
    #[error("Connection closed")]
    EndOfStream,

    /// Server broke the reply framing (e.g. mixed codes in one multi-line reply).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Reply line is shorter than a code or has a bad separator.
    #[error("Invalid reply format")]
    InvalidReplyFormat,

    /// Reply code is not a number in `200..600`.
    #[error("Invalid reply code: {0:?}")]
    InvalidReplyCode(String),

    /// Neither EHLO nor HELO was accepted.
    #[error("Server rejected both EHLO and HELO")]
    MissingHandshake,

    /// STARTTLS was refused or the TLS upgrade failed.
    #[error("STARTTLS failed: {0}")]
    StartTlsFailure(String),

    /// An authentication step received an unexpected reply.
    #[error("Login failed with {code}: {message}")]
    LoginFailed {
        /// Reply code (e.g., 535).
        code: u16,
        /// Message from server.
        message: String,
    },

    /// Server replied with a code the command does not accept.
    #[error("SMTP error {code}: {message}")]
    CommandFailed {
        /// Status code the server answered with.
        code: u16,
        /// Message from server.
        message: String,
    },

    /// The rendered mail is larger than the server's advertised `SIZE`.
    #[error("Message of {size} bytes exceeds the server limit of {limit} bytes")]
    MessageTooLarge {
        /// Rendered message size in bytes.
        size: usize,
        /// Limit from the EHLO reply.
        limit: usize,
    },

    /// Authentication mechanism is not implemented by this client.
    #[error("Authentication mechanism {} is not supported", .0.as_str())]
    UnsupportedAuth(AuthMechanism),

    /// The operation was dropped before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// The mail sender is no longer running.
    #[error("Mail sender is not running")]
    NotRunning,
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl Error {
    /// Creates a command failure from a reply code and message.
    #[must_use]
    pub fn command_failed(code: u16, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            code,
            message: message.into(),
        }
    }

    /// Returns the SMTP reply code carried by this error, if any.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::CommandFailed { code, .. } | Self::LoginFailed { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The server rejected the command for good (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self.code(), Some(code) if code >= 500 && code < 600)
    }

    /// The server asked to retry later (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.code(), Some(code) if code >= 400 && code < 500)
    }

    /// Returns true if the connection this error came from can no longer be used.
    #[must_use]
    pub const fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Tls(_)
                | Self::EndOfStream
                | Self::Protocol(_)
                | Self::InvalidReplyFormat
                | Self::InvalidReplyCode(_)
                | Self::Cancelled
        )
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let rejected = Error::command_failed(550, "no such user");
        assert!(rejected.is_permanent());
        assert!(!rejected.is_transient());
        assert!(!rejected.is_connection_fatal());

        let busy = Error::command_failed(451, "try later");
        assert!(busy.is_transient());

        let login = Error::LoginFailed {
            code: 535,
            message: "bad credentials".into(),
        };
        assert_eq!(login.code(), Some(535));
        assert!(login.is_permanent());

        assert!(Error::EndOfStream.is_connection_fatal());
        assert!(Error::InvalidReplyFormat.is_connection_fatal());
        assert!(!Error::StartTlsFailure("refused".into()).is_connection_fatal());
        assert!(!Error::MessageTooLarge { size: 2, limit: 1 }.is_connection_fatal());
        assert_eq!(Error::EndOfStream.code(), None);
    }

    #[test]
    fn test_io_error_is_shared_between_clones() {
        let error = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        let copy = error.clone();
        match (error, copy) {
            (Error::Io(a), Error::Io(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("expected I/O errors"),
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::command_failed(550, "mailbox unavailable").to_string(),
            "SMTP error 550: mailbox unavailable"
        );
        assert_eq!(
            Error::UnsupportedAuth(AuthMechanism::CramMd5).to_string(),
            "Authentication mechanism CRAM-MD5 is not supported"
        );
    }
}
