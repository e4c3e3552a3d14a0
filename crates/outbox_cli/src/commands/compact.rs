//! Compact command implementation.

use super::open_store;
use crate::error::CliResult;
use std::path::Path;
use tracing::info;

/// Log sizes around a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactReport {
    /// Log size before compaction.
    pub before: u64,
    /// Log size after compaction.
    pub after: u64,
}

/// Rewrites the commit log of the store at `path`.
pub fn compact(path: &Path) -> CliResult<CompactReport> {
    let store = open_store(path)?;
    let before = store.stats()?.log_bytes;
    store.compact()?;
    let after = store.stats()?.log_bytes;
    store.close()?;
    Ok(CompactReport { before, after })
}

/// Runs the compact command.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Compacting store at {}", path.display());
    let report = compact(path)?;
    info!(before = report.before, after = report.after, "compaction finished");

    let saved = report.before.saturating_sub(report.after);
    println!("  Before: {} bytes", report.before);
    println!("  After:  {} bytes", report.after);
    println!("  Saved:  {saved} bytes");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{conflicts::conflicts, fixture, inspect::inspect, list::list};
    use tempfile::tempdir;

    #[test]
    fn shrinks_log_and_keeps_state() {
        let dir = tempdir().unwrap();
        fixture::seed(dir.path());
        crate::commands::resolve::resolve(dir.path(), None, true).unwrap();

        let report = compact(dir.path()).unwrap();
        assert!(report.after < report.before);

        let ids: Vec<_> = list(dir.path(), None)
            .unwrap()
            .into_iter()
            .map(|m| (m.id.as_str().to_string(), m.retry_count))
            .collect();
        assert_eq!(
            ids,
            [("b".to_string(), 0), ("a".to_string(), 1), ("c".to_string(), 0)]
        );
        assert!(conflicts(dir.path()).unwrap().is_empty());
        assert_eq!(inspect(dir.path()).unwrap().commits, 1);
    }
}
