//! CLI command implementations.

pub mod clear;
pub mod compact;
pub mod conflicts;
pub mod inspect;
pub mod list;
pub mod resolve;
pub mod verify;

use crate::error::{CliError, CliResult};
use clap::ValueEnum;
use outbox_core::{DurableStore, StoreConfig};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Output format for listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens an existing store for maintenance.
///
/// Automatic compaction is disabled so that only `compact` rewrites the log.
pub(crate) fn open_store(path: &Path) -> CliResult<Arc<DurableStore>> {
    if !path.is_dir() {
        return Err(CliError::NotFound(path.to_path_buf()));
    }
    let config = StoreConfig::new()
        .create_if_missing(false)
        .compact_threshold_bytes(0);
    Ok(Arc::new(DurableStore::open(path, config)?))
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
