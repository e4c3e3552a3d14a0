//! Network reachability probe.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Reported network state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connectivity {
    /// A network interface is up.
    pub is_connected: bool,
    /// The internet is reachable through it.
    pub is_internet_reachable: bool,
}

impl Connectivity {
    /// Connected and reachable.
    pub const ONLINE: Self = Self {
        is_connected: true,
        is_internet_reachable: true,
    };

    /// No network.
    pub const OFFLINE: Self = Self {
        is_connected: false,
        is_internet_reachable: false,
    };

    /// Both flags must hold before a replay cycle runs.
    pub const fn is_online(&self) -> bool {
        self.is_connected && self.is_internet_reachable
    }
}

/// Reports whether the device can reach the remote endpoint.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Checks the current network state.
    async fn check(&self) -> SyncResult<Connectivity>;
}

/// A probe with a settable answer, for tests and embedders without a
/// platform network API.
#[derive(Debug)]
pub struct MockConnectivity {
    state: Mutex<Connectivity>,
    fail_next: Mutex<u32>,
    checks: Mutex<u64>,
}

impl Default for MockConnectivity {
    fn default() -> Self {
        Self::online()
    }
}

impl MockConnectivity {
    /// Starts online.
    pub fn online() -> Self {
        Self::with_state(Connectivity::ONLINE)
    }

    /// Starts offline.
    pub fn offline() -> Self {
        Self::with_state(Connectivity::OFFLINE)
    }

    fn with_state(state: Connectivity) -> Self {
        Self {
            state: Mutex::new(state),
            fail_next: Mutex::new(0),
            checks: Mutex::new(0),
        }
    }

    /// Switches between fully online and fully offline.
    pub fn set_online(&self, online: bool) {
        *self.state.lock() = if online {
            Connectivity::ONLINE
        } else {
            Connectivity::OFFLINE
        };
    }

    /// Sets both flags.
    pub fn set_connectivity(&self, state: Connectivity) {
        *self.state.lock() = state;
    }

    /// Makes the next `count` checks fail.
    pub fn fail_next(&self, count: u32) {
        *self.fail_next.lock() = count;
    }

    /// Number of checks so far.
    pub fn check_count(&self) -> u64 {
        *self.checks.lock()
    }
}

#[async_trait]
impl ConnectivityProbe for MockConnectivity {
    async fn check(&self) -> SyncResult<Connectivity> {
        *self.checks.lock() += 1;

        let mut fail_next = self.fail_next.lock();
        if *fail_next > 0 {
            *fail_next -= 1;
            return Err(SyncError::transport_retryable("connectivity check failed"));
        }
        drop(fail_next);

        Ok(*self.state.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_needs_both_flags() {
        assert!(Connectivity::ONLINE.is_online());
        assert!(!Connectivity::OFFLINE.is_online());
        assert!(!Connectivity {
            is_connected: true,
            is_internet_reachable: false,
        }
        .is_online());
    }

    #[tokio::test]
    async fn mock_reports_state() {
        let probe = MockConnectivity::offline();
        assert!(!probe.check().await.unwrap().is_online());

        probe.set_online(true);
        assert!(probe.check().await.unwrap().is_online());

        probe.set_connectivity(Connectivity {
            is_connected: true,
            is_internet_reachable: false,
        });
        assert!(!probe.check().await.unwrap().is_online());
        assert_eq!(probe.check_count(), 3);
    }

    #[tokio::test]
    async fn mock_fails_on_request() {
        let probe = MockConnectivity::online();
        probe.fail_next(2);
        assert!(probe.check().await.is_err());
        assert!(probe.check().await.is_err());
        assert!(probe.check().await.is_ok());
    }
}
