//! Shared in-memory log buffer.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::sync::Arc;

/// Log bytes held in memory.
///
/// Backs `DurableStore::open_in_memory`. Clones share one buffer, so a test
/// can simulate a restart by opening a second store over a clone of the
/// first store's backend.
///
/// ```rust
/// use outbox_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let survivor = backend.clone();
/// backend.append(b"commit").unwrap();
/// assert_eq!(survivor.size().unwrap(), 6);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    log: Arc<Mutex<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from existing log bytes, e.g. a log with a torn final frame.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            log: Arc::new(Mutex::new(data)),
        }
    }

    /// Snapshot of the log bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.log.lock().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let log = self.log.lock();
        let size = log.len() as u64;
        usize::try_from(offset)
            .ok()
            .and_then(|start| log.get(start..start.checked_add(len)?))
            .map(<[u8]>::to_vec)
            .ok_or(StorageError::ReadPastEnd { offset, len, size })
    }

    fn append(&mut self, frame: &[u8]) -> StorageResult<u64> {
        let mut log = self.log.lock();
        let offset = log.len() as u64;
        log.extend_from_slice(frame);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.log.lock().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut log = self.log.lock();
        let size = log.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        // new_size <= log.len(), so it fits in usize
        log.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_read_back_at_their_offsets() {
        let mut backend = InMemoryBackend::new();
        let first = backend.append(b"frame-1").unwrap();
        let second = backend.append(b"frame-22").unwrap();

        assert_eq!((first, second), (0, 7));
        assert_eq!(backend.read_at(second, 8).unwrap(), b"frame-22");
        assert!(matches!(
            backend.read_at(second, 9),
            Err(StorageError::ReadPastEnd { offset: 7, len: 9, size: 15 })
        ));
        assert!(backend.read_at(u64::MAX, 1).is_err());
    }

    #[test]
    fn reopening_over_a_clone_sees_prior_commits() {
        let mut before_restart = InMemoryBackend::new();
        let after_restart = before_restart.clone();
        before_restart.append(b"commit").unwrap();
        drop(before_restart);

        assert_eq!(after_restart.size().unwrap(), 6);
        assert_eq!(after_restart.read_at(0, 6).unwrap(), b"commit");
    }

    #[test]
    fn torn_tail_is_cut_and_next_commit_follows_the_last_whole_frame() {
        let mut backend = InMemoryBackend::with_data(b"wholetorn".to_vec());
        backend.truncate(5).unwrap();

        assert_eq!(backend.append(b"next").unwrap(), 5);
        assert_eq!(backend.data(), b"wholenext");
    }

    #[test]
    fn truncate_never_grows_the_log() {
        let mut backend = InMemoryBackend::with_data(b"frame".to_vec());
        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::TruncateBeyondEnd {
                requested: 100,
                size: 5
            })
        ));
        assert_eq!(backend.size().unwrap(), 5);
    }
}
