//! Resolve command implementation.

use super::open_store;
use crate::error::{CliError, CliResult};
use outbox_core::ConflictStore;
use std::path::Path;
use tracing::info;

/// Removes one conflict, or all of them when `all` is set. Returns the
/// number removed.
pub fn resolve(path: &Path, id: Option<&str>, all: bool) -> CliResult<usize> {
    let conflicts = ConflictStore::new(open_store(path)?);

    if all {
        return Ok(conflicts.resolve_all()?);
    }

    let id = id.unwrap_or_default();
    if conflicts.resolve_conflict(id)? {
        Ok(1)
    } else {
        Err(CliError::UnknownConflict(id.to_string()))
    }
}

/// Runs the resolve command.
pub fn run(path: &Path, id: Option<&str>, all: bool) -> CliResult<()> {
    let removed = resolve(path, id, all)?;
    info!(removed, "resolved conflicts");
    println!("Resolved {removed} conflict(s)");
    Ok(())
}
