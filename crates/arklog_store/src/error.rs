//! Error types for object store operations.

use std::io;
use thiserror::Error;

/// Result type for object store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during object store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested object does not exist.
    #[error("no such object: {key}")]
    NotFound {
        /// The key that was requested.
        key: String,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A transient failure (network, throttling) that may succeed on retry.
    #[error("transient store failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// The store rejected the request permanently.
    #[error("store rejected request: {message}")]
    Rejected {
        /// Description of the rejection.
        message: String,
    },
}

impl StoreError {
    /// Creates a transient failure error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a not-found error for `key`.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Returns true if the operation may succeed when retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. } | StoreError::Io(_))
    }
}
