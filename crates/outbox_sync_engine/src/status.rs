//! Publish/subscribe channel for sync status.
//!
//! Listeners are kept in a registry keyed by [`SubscriptionId`]. Emission
//! snapshots the registry and calls each listener outside the registry lock,
//! so a listener may subscribe or unsubscribe from inside its callback. A
//! panicking listener is logged and skipped; the others still run.
//!
//! Emissions are serialized: every listener sees updates in the order
//! they were recorded as [`StatusChannel::last`], even with concurrent
//! emitters. The delivery lock is reentrant, so a listener that emits
//! nests its update inside the one being delivered.

use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// Sync status shown to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Nothing in flight.
    Idle,
    /// A replay cycle is running.
    Syncing,
    /// The last cycle had at least one failure.
    Error,
}

impl SyncStatus {
    /// Returns the wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emission: a status plus the queue size at that moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Status.
    pub status: SyncStatus,
    /// Pending mutations.
    pub pending: usize,
}

/// Identifies a listener in a [`StatusChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(SyncStatus, usize) + Send + Sync>;

#[derive(Default)]
struct Registry {
    listeners: Mutex<BTreeMap<SubscriptionId, Listener>>,
    last: Mutex<Option<StatusUpdate>>,
    delivery: ReentrantMutex<()>,
    next_id: AtomicU64,
}

/// Broadcasts [`StatusUpdate`]s to any number of listeners.
#[derive(Clone, Default)]
pub struct StatusChannel {
    registry: Arc<Registry>,
}

impl StatusChannel {
    /// Creates an empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. It receives every later emission until it
    /// unsubscribes or the channel is cleared.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(SyncStatus, usize) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry.listeners.lock().insert(id, Arc::new(listener));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Delivers an update to every current listener.
    pub fn emit(&self, status: SyncStatus, pending: usize) {
        let _delivering = self.registry.delivery.lock();
        *self.registry.last.lock() = Some(StatusUpdate { status, pending });

        let listeners: Vec<(SubscriptionId, Listener)> = self
            .registry
            .listeners
            .lock()
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(status, pending))).is_err() {
                warn!(subscription = id.0, %status, pending, "status listener panicked");
            }
        }
    }

    /// The most recent emission.
    pub fn last(&self) -> Option<StatusUpdate> {
        *self.registry.last.lock()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.registry.listeners.lock().len()
    }

    /// Removes every listener.
    pub fn clear(&self) {
        self.registry.listeners.lock().clear();
    }
}

/// Handle returned by [`StatusChannel::subscribe`].
///
/// Dropping the handle leaves the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[must_use = "dropping a Subscription does not unsubscribe; keep it to unsubscribe later"]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<Registry>,
}

impl Subscription {
    /// The listener's id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Removes the listener. A no-op if it is already gone.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.listeners.lock().remove(&self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
