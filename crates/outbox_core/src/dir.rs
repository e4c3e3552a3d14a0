//! Store directory management.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK            # Advisory lock for single-writer
//! ├─ queue.log       # Commit log (queue + conflict tables)
//! └─ queue.log.tmp   # Compaction image, present only mid-compaction
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "queue.log";
const LOG_TEMP: &str = "queue.log.tmp";

/// An exclusively locked store directory.
///
/// The lock is held for the lifetime of this value.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreLocked`] if another handle holds the lock,
    /// or an error if the directory is missing and `create_if_missing` is
    /// false.
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_directory(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_directory(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        let dir = Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        };
        dir.remove_stale_temp()?;
        Ok(dir)
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the commit log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }

    /// Returns the path of the compaction image.
    #[must_use]
    pub fn temp_log_path(&self) -> PathBuf {
        self.path.join(LOG_TEMP)
    }

    /// Atomically replaces the log with the compaction image.
    pub fn install_temp_log(&self) -> CoreResult<()> {
        fs::rename(self.temp_log_path(), self.log_path())?;
        self.sync_directory()
    }

    /// A leftover image means compaction crashed before the rename; the log
    /// itself is still authoritative.
    fn remove_stale_temp(&self) -> CoreResult<()> {
        let temp = self.temp_log_path();
        if temp.exists() {
            fs::remove_file(&temp)?;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");

        let dir = StoreDir::open(&path, true).unwrap();
        assert!(path.is_dir());
        assert!(path.join("LOCK").exists());
        assert_eq!(dir.log_path(), path.join("queue.log"));
    }

    #[test]
    fn open_fails_if_missing_and_no_create() {
        let temp = tempdir().unwrap();
        let result = StoreDir::open(&temp.path().join("absent"), false);
        assert!(matches!(result, Err(CoreError::InvalidDirectory { .. })));
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let _first = StoreDir::open(temp.path(), true).unwrap();
        assert!(matches!(
            StoreDir::open(temp.path(), true),
            Err(CoreError::StoreLocked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        drop(StoreDir::open(temp.path(), true).unwrap());
        assert!(StoreDir::open(temp.path(), true).is_ok());
    }

    #[test]
    fn stale_temp_is_removed() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("queue.log.tmp"), b"half-written").unwrap();

        let dir = StoreDir::open(temp.path(), true).unwrap();
        assert!(!dir.temp_log_path().exists());
    }
}
