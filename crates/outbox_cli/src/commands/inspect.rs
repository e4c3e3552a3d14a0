//! Inspect command implementation.

use super::{open_store, print_json, Format};
use crate::error::CliResult;
use outbox_core::Timestamp;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectReport {
    /// Store path.
    pub path: String,
    /// Queued mutations.
    pub queued: usize,
    /// Recorded conflicts.
    pub conflicts: usize,
    /// Commit log size in bytes.
    pub log_bytes: u64,
    /// Commits replayed when the store was opened.
    pub commits: u64,
    /// Creation time of the next mutation to replay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_created_at: Option<Timestamp>,
    /// Queued mutations that have failed at least once.
    pub retrying: usize,
}

/// Collects statistics for the store at `path`.
pub fn inspect(path: &Path) -> CliResult<InspectReport> {
    let store = open_store(path)?;
    let stats = store.stats()?;
    let queued = store.peek(usize::MAX)?;

    Ok(InspectReport {
        path: path.display().to_string(),
        queued: stats.queued,
        conflicts: stats.conflicts,
        log_bytes: stats.log_bytes,
        commits: stats.replayed_commits,
        oldest_created_at: queued.first().map(|m| m.created_at),
        retrying: queued.iter().filter(|m| m.retry_count > 0).count(),
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> CliResult<()> {
    let report = inspect(path)?;
    match format {
        Format::Json => print_json(&report)?,
        Format::Text => print_text(&report),
    }
    Ok(())
}

fn print_text(report: &InspectReport) {
    println!("Outbox store: {}", report.path);
    println!();
    println!("Queue:");
    println!("  Pending:    {}", report.queued);
    println!("  Retrying:   {}", report.retrying);
    if let Some(oldest) = report.oldest_created_at {
        println!("  Oldest:     {oldest}");
    }
    println!();
    println!("Conflicts:    {}", report.conflicts);
    println!();
    println!("Commit log:");
    println!("  Size:       {} bytes", report.log_bytes);
    println!("  Commits:    {}", report.commits);
}
