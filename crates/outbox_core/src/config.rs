//! Store configuration.

/// Default size at which the commit log is compacted (1 MiB).
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1024 * 1024;

/// Configuration for opening a [`crate::DurableStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to sync the log after every commit (safer but slower).
    pub sync_on_write: bool,

    /// Log size that triggers automatic compaction (0 = never).
    pub compact_threshold_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: true,
            compact_threshold_bytes: DEFAULT_COMPACT_THRESHOLD,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the log on every commit.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the automatic compaction threshold.
    #[must_use]
    pub const fn compact_threshold_bytes(mut self, bytes: u64) -> Self {
        self.compact_threshold_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_write);
        assert_eq!(config.compact_threshold_bytes, DEFAULT_COMPACT_THRESHOLD);
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .create_if_missing(false)
            .sync_on_write(false)
            .compact_threshold_bytes(4096);

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_write);
        assert_eq!(config.compact_threshold_bytes, 4096);
    }
}
