//! Record of mutations the sync engine gave up on.

use crate::error::CoreResult;
use crate::store::DurableStore;
use crate::types::{ConflictReason, ConflictedMutation, QueuedMutation, Timestamp};
use std::sync::Arc;
use tracing::{info, warn};

/// Conflicted mutations, kept until the user acknowledges them.
///
/// Ids held here are never in the queue at the same time.
#[derive(Clone)]
pub struct ConflictStore {
    store: Arc<DurableStore>,
}

impl ConflictStore {
    /// Creates a conflict store over `store`.
    #[must_use]
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self { store }
    }

    /// Records a conflict. Any queued entry with the same id is removed in
    /// the same commit.
    pub fn add_conflict(
        &self,
        mutation: QueuedMutation,
        reason: ConflictReason,
        moved_at: Timestamp,
    ) -> CoreResult<()> {
        let id = mutation.id.clone();
        self.store.write(|txn| {
            if txn.get(id.as_str()).is_some() {
                txn.delete(id.clone());
            }
            txn.put_conflict(mutation, reason, moved_at);
            Ok(())
        })?;
        warn!(mutation_id = %id, %reason, "recorded conflict");
        Ok(())
    }

    /// Moves a queued mutation into the conflict store in one commit.
    ///
    /// Returns `None` without writing anything if the id is no longer queued.
    pub fn escalate(
        &self,
        id: &str,
        reason: ConflictReason,
        moved_at: Timestamp,
    ) -> CoreResult<Option<ConflictedMutation>> {
        let escalated = self.store.write(|txn| {
            let Some(mutation) = txn.get(id).cloned() else {
                return Ok(None);
            };
            txn.delete(mutation.id.clone());
            txn.put_conflict(mutation.clone(), reason, moved_at);
            Ok(Some(ConflictedMutation {
                mutation,
                reason,
                moved_at,
            }))
        })?;

        if let Some(conflict) = &escalated {
            warn!(
                mutation_id = %conflict.id(),
                retry_count = conflict.mutation.retry_count,
                %reason,
                "escalated mutation to conflict store"
            );
        }
        Ok(escalated)
    }

    /// All conflicts in escalation order.
    pub fn get_conflicts(&self) -> CoreResult<Vec<ConflictedMutation>> {
        self.store.conflicts()
    }

    /// Returns a conflict by id.
    pub fn get(&self, id: &str) -> CoreResult<Option<ConflictedMutation>> {
        self.store.get_conflict(id)
    }

    /// Number of conflicts.
    pub fn conflict_count(&self) -> CoreResult<usize> {
        self.store.conflict_count()
    }

    /// Acknowledges a conflict. Returns whether one was removed.
    pub fn resolve_conflict(&self, id: &str) -> CoreResult<bool> {
        let removed = self.store.write(|txn| {
            let Some(conflict) = txn.get_conflict(id) else {
                return Ok(false);
            };
            let id = conflict.id().clone();
            txn.delete_conflict(id);
            Ok(true)
        })?;
        if removed {
            info!(mutation_id = %id, "resolved conflict");
        }
        Ok(removed)
    }

    /// Acknowledges every conflict. Returns how many were removed.
    pub fn resolve_all(&self) -> CoreResult<usize> {
        let removed = self.store.write(|txn| {
            let len = txn.conflict_len();
            if len > 0 {
                txn.clear_conflicts();
            }
            Ok(len)
        })?;
        info!(removed, "resolved all conflicts");
        Ok(removed)
    }
}
