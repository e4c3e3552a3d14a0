//! CLI error type.

use outbox_core::CoreError;
use outbox_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Store operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Log file could not be read.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// JSON output could not be produced.
    #[error("failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// No store directory at the given path.
    #[error("no outbox store found at {}", .0.display())]
    NotFound(PathBuf),

    /// `resolve` named an id that is not in the conflict store.
    #[error("no conflict with id {0}")]
    UnknownConflict(String),

    /// `clear` was run without `--yes`.
    #[error("refusing to clear the queue without --yes")]
    NotConfirmed,

    /// `verify` found an unreadable frame.
    #[error("verification failed: unreadable frame at offset {offset}")]
    VerificationFailed {
        /// Offset of the first bad frame.
        offset: u64,
    },
}
