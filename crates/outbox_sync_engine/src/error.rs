//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while replaying mutations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the failure looks transient.
        retryable: bool,
    },

    /// The endpoint answered with a non-success status.
    #[error("http status {status}")]
    Http {
        /// Status code.
        status: u16,
    },

    /// The endpoint answered with an application-level error list.
    #[error("graphql errors: {}", messages.join("; "))]
    Graphql {
        /// Error messages reported by the endpoint.
        messages: Vec<String>,
    },

    /// The response body could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A bounded call ran out of time.
    #[error("operation timed out")]
    Timeout,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the failure looks transient.
    ///
    /// Used for log classification only. Every failed replay attempt counts
    /// against the same retry budget regardless of this value.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Http { status } => *status >= 500 || *status == 408 || *status == 429,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}
