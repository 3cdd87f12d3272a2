//! Error types for the SMTP session wrapper.

use std::io;

use thiserror::Error;

/// Errors raised by the SMTP session itself.
///
/// Server-side refusals are not errors at this layer: every command
/// returns the server's [`crate::Reply`] and the caller decides what a
/// given code means. This enum covers only the transport and the protocol
/// framing.
#[derive(Debug, Error)]
pub enum SmtpError {
    /// I/O failure on the underlying TCP stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server closed the connection mid-exchange.
    #[error("connection closed unexpectedly")]
    ConnectionClosed,

    /// The server sent bytes that do not parse as an SMTP reply.
    #[error("malformed reply: {0}")]
    Malformed(String),
}

impl SmtpError {
    /// Transient errors: the same delivery may succeed on a later run.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed)
    }

    /// Local protocol errors: retrying will not help, the session is
    /// unusable and the condition indicates a bug or a broken peer.
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

/// Specialized `Result` type for SMTP session operations.
pub type Result<T> = std::result::Result<T, SmtpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let err = SmtpError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(err.is_transient());
        assert!(!err.is_local());

        assert!(SmtpError::ConnectionClosed.is_transient());

        let err = SmtpError::Malformed("not a code".to_string());
        assert!(err.is_local());
        assert!(!err.is_transient());
    }
}
