//! Verify command implementation.

use crate::error::{CliError, CliResult};
use outbox_core::log::{scan, TornTail};
use outbox_core::StoreDir;
use outbox_storage::{FileBackend, StorageBackend};
use std::path::Path;

/// Commit log verification result.
#[derive(Debug)]
pub struct VerifyReport {
    /// Log size in bytes.
    pub log_bytes: u64,
    /// Number of intact commits.
    pub commits: usize,
    /// Number of operations across all intact commits.
    pub operations: usize,
    /// Length of the intact prefix.
    pub valid_len: u64,
    /// First unreadable frame, if any.
    pub torn: Option<TornTail>,
}

impl VerifyReport {
    fn empty() -> Self {
        Self {
            log_bytes: 0,
            commits: 0,
            operations: 0,
            valid_len: 0,
            torn: None,
        }
    }

    /// Returns true when every byte of the log belongs to an intact commit.
    pub fn is_ok(&self) -> bool {
        self.torn.is_none()
    }
}

/// Walks every frame of the commit log without modifying it.
///
/// The store lock is held for the duration so no writer races the scan.
pub fn verify(path: &Path) -> CliResult<VerifyReport> {
    if !path.is_dir() {
        return Err(CliError::NotFound(path.to_path_buf()));
    }
    let dir = StoreDir::open(path, false)?;
    let log_path = dir.log_path();
    if !log_path.exists() {
        return Ok(VerifyReport::empty());
    }

    let backend = FileBackend::open(&log_path)?;
    let log_bytes = backend.size()?;
    let result = scan(&backend)?;

    Ok(VerifyReport {
        log_bytes,
        commits: result.entries.len(),
        operations: result.entries.iter().map(|(_, e)| e.ops.len()).sum(),
        valid_len: result.valid_len,
        torn: result.torn,
    })
}

/// Runs the verify command.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Verifying store at {}", path.display());
    println!();

    let report = verify(path)?;
    println!("Commit log:");
    println!("  Size:        {} bytes", report.log_bytes);
    println!("  Commits:     {}", report.commits);
    println!("  Operations:  {}", report.operations);
    println!("  Valid bytes: {}", report.valid_len);

    println!();
    match &report.torn {
        None => {
            println!("✓ Store verification passed");
            Ok(())
        }
        Some(torn) => {
            println!(
                "  Torn tail:   {} bytes at offset {} ({})",
                torn.dropped_bytes, torn.offset, torn.reason
            );
            println!();
            println!("✗ Store verification failed");
            println!("  Opening the store will discard the torn tail.");
            Err(CliError::VerificationFailed {
                offset: torn.offset,
            })
        }
    }
}
