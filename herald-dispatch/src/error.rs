//! Typed error handling for dispatch operations.
//!
//! Failures split into the classes the dispatcher reacts to differently:
//! per-row conditions (transient, permanent, message-failed) are recorded
//! against the queue entry and never abort a run; everything else
//! propagates.

use herald_directory::DirectoryError;
use herald_smtp::{Reply, SmtpError};
use herald_store::StoreError;
use thiserror::Error;

/// The reply (or transport condition) behind a failed delivery step,
/// in the shape the queue entry records it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedReply {
    pub code: Option<u16>,
    pub message: String,
}

impl FailedReply {
    #[must_use]
    pub fn from_reply(reply: &Reply) -> Self {
        Self {
            code: Some(reply.code),
            message: reply.text(),
        }
    }
}

impl std::fmt::Display for FailedReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{code} {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Top-level dispatch error type.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Transient delivery failure (4xx reply, transport hiccup). Counted
    /// against the entry's retry budget.
    #[error("transient delivery failure: {0}")]
    Transient(FailedReply),

    /// Permanent delivery failure (5xx reply). Also counted against the
    /// budget; the class only matters for reporting.
    #[error("permanent delivery failure: {0}")]
    Permanent(FailedReply),

    /// The server answered outside the expected code class for the
    /// command (e.g. a 3xx to MAIL FROM). Treated as a per-row failure.
    #[error("message transfer failed: {0}")]
    MessageFailed(FailedReply),

    /// Local protocol violation (unparseable reply). Fatal for the run.
    #[error("SMTP protocol violation: {0}")]
    Protocol(String),

    /// The caller supplied a bad request; nothing was persisted.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Storage failure. Fatal in the dispatcher, surfaced in producers.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Party directory failure. Fatal for the run.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl DispatchError {
    /// Classify a refusal reply: 4xx transient, 5xx permanent, anything
    /// else out-of-class.
    #[must_use]
    pub fn from_reply(reply: &Reply) -> Self {
        let failed = FailedReply::from_reply(reply);
        if reply.is_transient_failure() {
            Self::Transient(failed)
        } else if reply.is_permanent_failure() {
            Self::Permanent(failed)
        } else {
            Self::MessageFailed(failed)
        }
    }

    /// Whether this failure is recorded against one queue entry rather
    /// than aborting the run.
    #[must_use]
    pub const fn is_row_failure(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Permanent(_) | Self::MessageFailed(_)
        )
    }

    /// The reply behind a per-row failure, if this is one.
    #[must_use]
    pub const fn failed_reply(&self) -> Option<&FailedReply> {
        match self {
            Self::Transient(failed) | Self::Permanent(failed) | Self::MessageFailed(failed) => {
                Some(failed)
            }
            _ => None,
        }
    }
}

impl From<SmtpError> for DispatchError {
    fn from(error: SmtpError) -> Self {
        if error.is_transient() {
            Self::Transient(FailedReply {
                code: None,
                message: error.to_string(),
            })
        } else {
            Self::Protocol(error.to_string())
        }
    }
}

/// Specialized `Result` type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
