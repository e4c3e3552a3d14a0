//! Error types for the outbox core.

use crate::types::MutationId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in queue and conflict store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] outbox_storage::StorageError),

    /// I/O error outside the storage backend (directory, lock, rename).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A log entry could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The commit log is corrupted before its tail.
    #[error("log corruption at offset {offset}: {message}")]
    LogCorruption {
        /// Offset of the offending frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected in a frame.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the frame.
        expected: u32,
        /// Checksum computed over the frame.
        actual: u32,
    },

    /// The store directory is locked by another process.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// The store directory is missing or is not a directory.
    #[error("invalid store directory: {message}")]
    InvalidDirectory {
        /// Description of the problem.
        message: String,
    },

    /// The store was closed.
    #[error("store is closed")]
    StoreClosed,

    /// The mutation id is parked in the conflict store.
    #[error("mutation {0} is in the conflict store and cannot be re-enqueued")]
    AlreadyConflicted(MutationId),

    /// An argument was rejected.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::LogCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid directory error.
    pub fn invalid_directory(message: impl Into<String>) -> Self {
        Self::InvalidDirectory {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::log_corruption(42, "bad magic");
        assert_eq!(err.to_string(), "log corruption at offset 42: bad magic");

        let err = CoreError::ChecksumMismatch {
            expected: 0xDEAD_BEEF,
            actual: 0x0000_0001,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: expected deadbeef, got 00000001"
        );

        let err = CoreError::AlreadyConflicted(MutationId::new("m-1"));
        assert!(err.to_string().contains("m-1"));
    }
}
