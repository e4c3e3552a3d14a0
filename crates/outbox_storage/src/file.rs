//! On-disk log file.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// The outbox log (`queue.log`) or a compaction image (`queue.log.tmp`).
///
/// Appends always land at the tracked end of the log. A commit is durable
/// once `sync` returns; `truncate` syncs on its own because it only runs
/// when recovery drops a torn frame.
///
/// ```no_run
/// use outbox_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut log = FileBackend::open(Path::new("queue.log")).unwrap();
/// log.append(b"frame").unwrap();
/// log.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    inner: Mutex<LogFile>,
}

#[derive(Debug)]
struct LogFile {
    file: File,
    len: u64,
}

impl FileBackend {
    /// Opens the log at `path`, creating it if absent and keeping existing frames.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::with_options(path, false)
    }

    /// Starts a fresh compaction image at `path`, discarding a leftover one.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn create_empty(path: &Path) -> StorageResult<Self> {
        Self::with_options(path, true)
    }

    fn with_options(path: &Path, discard: bool) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(discard)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            inner: Mutex::new(LogFile { file, len }),
        })
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut log = self.inner.lock();
        let size = log.len;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let mut frame = vec![0u8; len];
        if len > 0 {
            log.file.seek(SeekFrom::Start(offset))?;
            log.file.read_exact(&mut frame)?;
        }
        Ok(frame)
    }

    fn append(&mut self, frame: &[u8]) -> StorageResult<u64> {
        let log = self.inner.get_mut();
        let offset = log.len;
        if !frame.is_empty() {
            log.file.seek(SeekFrom::Start(offset))?;
            log.file.write_all(frame)?;
            log.len += frame.len() as u64;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let log = self.inner.get_mut();
        if new_size > log.len {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: log.len,
            });
        }
        log.file.set_len(new_size)?;
        log.file.sync_all()?;
        log.len = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn committed_frames_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");

        {
            let mut log = FileBackend::open(&path).unwrap();
            assert_eq!(log.append(b"commit-1").unwrap(), 0);
            assert_eq!(log.append(b"commit-2").unwrap(), 8);
            log.sync().unwrap();
        }

        let mut log = FileBackend::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 16);
        assert_eq!(log.read_at(8, 8).unwrap(), b"commit-2");
        assert_eq!(log.append(b"commit-3").unwrap(), 16);
    }

    #[test]
    fn torn_tail_is_cut_before_the_next_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");
        std::fs::write(&path, b"wholetorn").unwrap();

        let mut log = FileBackend::open(&path).unwrap();
        log.truncate(5).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 5);

        assert_eq!(log.append(b"next").unwrap(), 5);
        log.sync().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"wholenext");
    }

    #[test]
    fn truncate_never_grows_the_log() {
        let dir = tempdir().unwrap();
        let mut log = FileBackend::open(&dir.path().join("queue.log")).unwrap();
        log.append(b"frame").unwrap();

        assert!(matches!(
            log.truncate(50),
            Err(StorageError::TruncateBeyondEnd {
                requested: 50,
                size: 5
            })
        ));
        assert!(matches!(
            log.read_at(3, 3),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn compaction_image_starts_empty_over_a_leftover() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log.tmp");
        std::fs::write(&path, b"half-written image").unwrap();

        let mut image = FileBackend::create_empty(&path).unwrap();
        assert_eq!(image.size().unwrap(), 0);
        assert_eq!(image.append(b"live").unwrap(), 0);
        image.sync().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"live");
    }
}
