//! Clear command implementation.

use super::open_store;
use crate::error::{CliError, CliResult};
use outbox_core::{MutationQueue, DEFAULT_MAX_QUEUE_SIZE};
use std::path::Path;
use tracing::warn;

/// Drops every queued mutation. Conflicts are left alone.
pub fn clear(path: &Path, confirmed: bool) -> CliResult<usize> {
    if !confirmed {
        return Err(CliError::NotConfirmed);
    }
    let queue = MutationQueue::new(open_store(path)?, DEFAULT_MAX_QUEUE_SIZE)?;
    Ok(queue.clear_all()?)
}

/// Runs the clear command.
pub fn run(path: &Path, confirmed: bool) -> CliResult<()> {
    let removed = clear(path, confirmed)?;
    warn!(removed, "cleared outbox queue");
    println!("Removed {removed} queued mutation(s)");
    Ok(())
}
