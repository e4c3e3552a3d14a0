//! Conflicts command implementation.

use super::{open_store, print_json, Format};
use crate::error::CliResult;
use outbox_core::ConflictedMutation;
use std::path::Path;

/// Returns every conflict in escalation order.
pub fn conflicts(path: &Path) -> CliResult<Vec<ConflictedMutation>> {
    Ok(open_store(path)?.conflicts()?)
}

/// Runs the conflicts command.
pub fn run(path: &Path, format: Format) -> CliResult<()> {
    let conflicts = conflicts(path)?;
    match format {
        Format::Json => print_json(&conflicts)?,
        Format::Text => {
            if conflicts.is_empty() {
                println!("No conflicts");
                return Ok(());
            }
            println!(
                "{:<40} {:<24} {:<22} {:>7} {:>15}",
                "ID", "OPERATION", "REASON", "RETRIES", "MOVED_AT"
            );
            for c in &conflicts {
                println!(
                    "{:<40} {:<24} {:<22} {:>7} {:>15}",
                    c.id().as_str(),
                    c.mutation.operation_name,
                    c.reason.as_str(),
                    c.mutation.retry_count,
                    c.moved_at
                );
            }
        }
    }
    Ok(())
}
