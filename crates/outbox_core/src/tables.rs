//! In-memory tables rebuilt from the commit log.

use crate::log::LogOp;
use crate::types::{ConflictedMutation, MutationId, QueuedMutation, Timestamp};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Ordering key for the queue: creation time, then insertion slot.
type QueueKey = (Timestamp, u64, MutationId);

struct QueueSlot {
    slot: u64,
    mutation: QueuedMutation,
}

struct ConflictSlot {
    slot: u64,
    conflict: ConflictedMutation,
}

/// The queue table and the conflict table.
///
/// Ids present in `conflicts` are never present in `queue`.
#[derive(Default)]
pub(crate) struct Tables {
    queue: HashMap<MutationId, QueueSlot>,
    queue_order: BTreeSet<QueueKey>,
    conflicts: HashMap<MutationId, ConflictSlot>,
    conflict_order: BTreeMap<u64, MutationId>,
    next_slot: u64,
}

impl Tables {
    pub(crate) fn apply(&mut self, op: LogOp) {
        match op {
            LogOp::Put(mutation) => {
                self.remove_queued(&mutation.id);
                let slot = self.take_slot();
                self.queue_order
                    .insert((mutation.created_at, slot, mutation.id.clone()));
                self.queue
                    .insert(mutation.id.clone(), QueueSlot { slot, mutation });
            }
            LogOp::Delete(id) => {
                self.remove_queued(&id);
            }
            LogOp::SetRetry { id, retry_count } => {
                if let Some(entry) = self.queue.get_mut(&id) {
                    entry.mutation.retry_count = retry_count;
                }
            }
            LogOp::PutConflict {
                mutation,
                reason,
                moved_at,
            } => {
                self.remove_queued(&mutation.id);
                self.remove_conflict(&mutation.id);
                let slot = self.take_slot();
                let id = mutation.id.clone();
                self.conflict_order.insert(slot, id.clone());
                self.conflicts.insert(
                    id,
                    ConflictSlot {
                        slot,
                        conflict: ConflictedMutation {
                            mutation,
                            reason,
                            moved_at,
                        },
                    },
                );
            }
            LogOp::DeleteConflict(id) => {
                self.remove_conflict(&id);
            }
            LogOp::ClearQueue => {
                self.queue.clear();
                self.queue_order.clear();
            }
            LogOp::ClearConflicts => {
                self.conflicts.clear();
                self.conflict_order.clear();
            }
        }
    }

    fn take_slot(&mut self) -> u64 {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    fn remove_queued(&mut self, id: &MutationId) -> Option<QueuedMutation> {
        let entry = self.queue.remove(id)?;
        self.queue_order
            .remove(&(entry.mutation.created_at, entry.slot, id.clone()));
        Some(entry.mutation)
    }

    fn remove_conflict(&mut self, id: &MutationId) -> Option<ConflictedMutation> {
        let entry = self.conflicts.remove(id)?;
        self.conflict_order.remove(&entry.slot);
        Some(entry.conflict)
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn get(&self, id: &str) -> Option<&QueuedMutation> {
        self.queue.get(id).map(|entry| &entry.mutation)
    }

    /// Queued mutations in replay order.
    pub(crate) fn queued(&self) -> impl Iterator<Item = &QueuedMutation> {
        self.queue_order
            .iter()
            .filter_map(|(_, _, id)| self.get(id.as_str()))
    }

    pub(crate) fn conflict_len(&self) -> usize {
        self.conflicts.len()
    }

    pub(crate) fn get_conflict(&self, id: &str) -> Option<&ConflictedMutation> {
        self.conflicts.get(id).map(|entry| &entry.conflict)
    }

    /// Conflicts in escalation order.
    pub(crate) fn conflicts(&self) -> impl Iterator<Item = &ConflictedMutation> {
        self.conflict_order
            .values()
            .filter_map(|id| self.get_conflict(id.as_str()))
    }

    /// Ops that recreate the current state from an empty log.
    pub(crate) fn snapshot_ops(&self) -> Vec<LogOp> {
        let queued = self.queued().cloned().map(LogOp::Put);
        let conflicts = self.conflicts().cloned().map(|c| LogOp::PutConflict {
            mutation: c.mutation,
            reason: c.reason,
            moved_at: c.moved_at,
        });
        queued.chain(conflicts).collect()
    }
}
