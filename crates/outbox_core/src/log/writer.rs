//! Log writer.

use crate::error::CoreResult;
use crate::log::record::{LogEntry, LogOp};
use outbox_storage::StorageBackend;
use tracing::warn;

/// Appends commits to a storage backend.
pub struct LogWriter {
    backend: Box<dyn StorageBackend>,
    sync_on_write: bool,
    next_sequence: u64,
}

impl LogWriter {
    /// Creates a writer that continues at `next_sequence`.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool, next_sequence: u64) -> Self {
        Self {
            backend,
            sync_on_write,
            next_sequence,
        }
    }

    /// Writes `ops` as one commit and returns its sequence number.
    ///
    /// If the append fails, the backend is truncated back to its previous
    /// size so a partial frame never precedes later commits.
    pub fn append(&mut self, ops: Vec<LogOp>) -> CoreResult<u64> {
        let sequence = self.next_sequence;
        let frame = LogEntry { sequence, ops }.encode_frame()?;

        let before = self.backend.size()?;
        if let Err(e) = self.write_frame(&frame) {
            if let Err(rollback) = self.backend.truncate(before) {
                warn!(error = %rollback, offset = before, "failed to roll back partial log frame");
            }
            return Err(e);
        }

        self.next_sequence += 1;
        Ok(sequence)
    }

    fn write_frame(&mut self, frame: &[u8]) -> CoreResult<()> {
        self.backend.append(frame)?;
        if self.sync_on_write {
            self.backend.flush()?;
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Current log size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Sequence number the next commit will get.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Flushes and syncs the backend.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }

    /// Drops everything after `len` bytes.
    pub fn truncate(&mut self, len: u64) -> CoreResult<()> {
        self.backend.truncate(len)?;
        Ok(())
    }

    /// Swaps in a new backend, e.g. after compaction renamed a fresh image
    /// over the log file.
    pub fn replace_backend(&mut self, backend: Box<dyn StorageBackend>) {
        self.backend = backend;
    }

    /// Rewrites the log in place as a single snapshot commit.
    ///
    /// Only used for backends without a directory to rename within; the
    /// rewrite is not crash-atomic.
    pub fn rewrite_in_place(&mut self, ops: Vec<LogOp>) -> CoreResult<()> {
        let frame = LogEntry {
            sequence: self.next_sequence,
            ops,
        }
        .encode_frame()?;
        self.backend.truncate(0)?;
        self.write_frame(&frame)?;
        self.next_sequence += 1;
        Ok(())
    }

    /// Encodes a snapshot commit without writing it.
    pub fn snapshot_frame(&self, ops: Vec<LogOp>) -> CoreResult<Vec<u8>> {
        LogEntry {
            sequence: self.next_sequence,
            ops,
        }
        .encode_frame()
    }

    /// Marks the snapshot frame returned by [`Self::snapshot_frame`] as written.
    pub fn advance_sequence(&mut self) {
        self.next_sequence += 1;
    }
}
