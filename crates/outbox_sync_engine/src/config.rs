//! Configuration for the sync engine.

use outbox_core::DEFAULT_MAX_QUEUE_SIZE;
use std::time::Duration;

/// Default interval between replay cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of mutations replayed per cycle.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default number of failed attempts before a mutation is escalated.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between automatic replay cycles.
    pub poll_interval: Duration,
    /// Maximum mutations replayed per cycle.
    pub batch_size: usize,
    /// Queue capacity.
    pub max_queue_size: usize,
    /// Retry policy.
    pub retry: RetryPolicy,
    /// Upper bound on a single remote call.
    pub replay_timeout: Duration,
    /// Upper bound on a connectivity probe.
    pub connectivity_timeout: Duration,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-call replay timeout.
    #[must_use]
    pub fn with_replay_timeout(mut self, timeout: Duration) -> Self {
        self.replay_timeout = timeout;
        self
    }

    /// Sets the connectivity probe timeout.
    #[must_use]
    pub fn with_connectivity_timeout(mut self, timeout: Duration) -> Self {
        self.connectivity_timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            retry: RetryPolicy::default(),
            replay_timeout: Duration::from_secs(30),
            connectivity_timeout: Duration::from_secs(10),
        }
    }
}

/// How many failed attempts a mutation gets.
///
/// The budget is the same for every kind of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts after which a mutation is escalated.
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Creates a policy with the given budget.
    pub const fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}
