//! Error types for the request store.

use herald_common::RequestId;
use thiserror::Error;

/// Failures surfaced by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No request with the given id exists.
    #[error("request not found: {0}")]
    RequestNotFound(RequestId),

    /// Internal backend failure (lock poisoning, driver errors, etc.).
    #[error("internal store error: {0}")]
    Internal(String),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("lock poisoned: {e}"))
    }
}
