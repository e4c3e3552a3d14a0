//! Bounded FIFO of pending mutations.

use crate::error::{CoreError, CoreResult};
use crate::store::DurableStore;
use crate::types::{
    ConflictReason, ConflictedMutation, MutationId, NewMutation, QueuedMutation, Timestamp,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default queue capacity.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 500;

/// What [`MutationQueue::enqueue`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// The mutation was added.
    Inserted,
    /// An entry with the same id was replaced.
    Replaced,
    /// The mutation was added after evicting these entries, oldest first.
    Evicted(Vec<QueuedMutation>),
}

/// What [`MutationQueue::record_failure`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// The retry count was bumped to this value; the mutation stays queued.
    Retrying(u32),
    /// The retry budget ran out and the mutation moved to the conflict store.
    Escalated(ConflictedMutation),
    /// The queued entry is no longer the one that was replayed. Nothing
    /// was written.
    Superseded,
}

/// A capacity-bounded queue of mutations ordered by creation time.
///
/// When full, enqueueing a new id evicts the oldest entry in the same
/// commit as the insert.
#[derive(Clone)]
pub struct MutationQueue {
    store: Arc<DurableStore>,
    capacity: usize,
}

impl MutationQueue {
    /// Creates a queue over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `capacity` is zero.
    pub fn new(store: Arc<DurableStore>, capacity: usize) -> CoreResult<Self> {
        if capacity == 0 {
            return Err(CoreError::invalid_argument("queue capacity must be at least 1"));
        }
        Ok(Self { store, capacity })
    }

    /// Maximum number of queued mutations.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adds a mutation with a retry count of zero, replacing any entry with
    /// the same id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyConflicted`] if the id is in the conflict
    /// store.
    pub fn enqueue(&self, mutation: NewMutation) -> CoreResult<EnqueueOutcome> {
        let mutation: QueuedMutation = mutation.into();
        let id = mutation.id.clone();
        let capacity = self.capacity;

        let outcome = self.store.write(|txn| {
            if txn.get_conflict(id.as_str()).is_some() {
                return Err(CoreError::AlreadyConflicted(id.clone()));
            }

            if txn.get(id.as_str()).is_some() {
                txn.put(mutation);
                return Ok(EnqueueOutcome::Replaced);
            }

            let excess = (txn.queue_len() + 1).saturating_sub(capacity);
            let evicted: Vec<QueuedMutation> = txn.queued().take(excess).cloned().collect();
            for old in &evicted {
                txn.delete(old.id.clone());
            }
            txn.put(mutation);

            if evicted.is_empty() {
                Ok(EnqueueOutcome::Inserted)
            } else {
                Ok(EnqueueOutcome::Evicted(evicted))
            }
        })?;

        match &outcome {
            EnqueueOutcome::Evicted(evicted) => {
                for old in evicted {
                    info!(
                        mutation_id = %old.id,
                        created_at = old.created_at,
                        "queue full, evicted oldest mutation"
                    );
                }
            }
            EnqueueOutcome::Replaced => debug!(mutation_id = %id, "replaced queued mutation"),
            EnqueueOutcome::Inserted => debug!(mutation_id = %id, "enqueued mutation"),
        }
        Ok(outcome)
    }

    /// Removes a mutation. Removing an absent id is a no-op.
    pub fn dequeue(&self, id: &str) -> CoreResult<()> {
        self.store.write(|txn| {
            if let Some(existing) = txn.get(id) {
                let id = existing.id.clone();
                txn.delete(id);
            }
            Ok(())
        })
    }

    /// Removes `replayed` after a successful replay.
    ///
    /// Nothing is removed if the id was dequeued or re-enqueued with a
    /// different payload while the replay was in flight; the newer entry has
    /// not been sent yet. Returns whether the entry was removed.
    pub fn complete(&self, replayed: &QueuedMutation) -> CoreResult<bool> {
        self.store.write(|txn| {
            if txn.get(replayed.id.as_str()) != Some(replayed) {
                return Ok(false);
            }
            txn.delete(replayed.id.clone());
            Ok(true)
        })
    }

    /// Charges a failed replay of `replayed` against its retry budget.
    ///
    /// When the new count reaches `max_retries` the mutation moves to the
    /// conflict store in the same commit. Like [`Self::complete`], an entry
    /// replaced or removed during the replay is left untouched.
    pub fn record_failure(
        &self,
        replayed: &QueuedMutation,
        max_retries: u32,
        moved_at: Timestamp,
    ) -> CoreResult<FailureOutcome> {
        let outcome = self.store.write(|txn| {
            if txn.get(replayed.id.as_str()) != Some(replayed) {
                return Ok(FailureOutcome::Superseded);
            }

            let retry_count = replayed.retry_count.saturating_add(1);
            if retry_count < max_retries {
                txn.set_retry(replayed.id.clone(), retry_count);
                return Ok(FailureOutcome::Retrying(retry_count));
            }

            let mutation = QueuedMutation {
                retry_count,
                ..replayed.clone()
            };
            let reason = ConflictReason::MaxRetriesExceeded;
            txn.delete(mutation.id.clone());
            txn.put_conflict(mutation.clone(), reason, moved_at);
            Ok(FailureOutcome::Escalated(ConflictedMutation {
                mutation,
                reason,
                moved_at,
            }))
        })?;

        match &outcome {
            FailureOutcome::Escalated(conflict) => warn!(
                mutation_id = %conflict.id(),
                retry_count = conflict.mutation.retry_count,
                reason = %conflict.reason,
                "escalated mutation to conflict store"
            ),
            FailureOutcome::Superseded => {
                debug!(mutation_id = %replayed.id, "replayed entry superseded, failure dropped")
            }
            FailureOutcome::Retrying(_) => {}
        }
        Ok(outcome)
    }

    /// Up to `limit` mutations, oldest first.
    pub fn peek(&self, limit: usize) -> CoreResult<Vec<QueuedMutation>> {
        self.store.peek(limit)
    }

    /// Returns a queued mutation by id.
    pub fn get(&self, id: &str) -> CoreResult<Option<QueuedMutation>> {
        self.store.get(id)
    }

    /// Records a failed replay attempt and returns the new retry count, or
    /// `None` if the id is no longer queued.
    pub fn increment_retry(&self, id: &str) -> CoreResult<Option<u32>> {
        self.store.write(|txn| {
            let Some(existing) = txn.get(id) else {
                return Ok(None);
            };
            let retry_count = existing.retry_count.saturating_add(1);
            let id = existing.id.clone();
            txn.set_retry(id, retry_count);
            Ok(Some(retry_count))
        })
    }

    /// Exact number of queued mutations.
    pub fn queue_size(&self) -> CoreResult<usize> {
        self.store.queued_count()
    }

    /// Ids whose retry count already reached `max_retries`, oldest first.
    pub fn exhausted(&self, max_retries: u32) -> CoreResult<Vec<MutationId>> {
        self.store.exhausted(max_retries)
    }

    /// Drops every queued mutation. Returns how many were removed.
    pub fn clear_all(&self) -> CoreResult<usize> {
        let removed = self.store.write(|txn| {
            let len = txn.queue_len();
            if len > 0 {
                txn.clear_queue();
            }
            Ok(len)
        })?;
        info!(removed, "cleared mutation queue");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(capacity: usize) -> MutationQueue {
        let store = Arc::new(DurableStore::open_in_memory().unwrap());
        MutationQueue::new(store, capacity).unwrap()
    }

    fn mutation(id: &str, created_at: u64) -> NewMutation {
        NewMutation::new(id, "UpdateNote", "mutation { updateNote }", created_at)
    }

    fn peek_ids(queue: &MutationQueue) -> Vec<String> {
        queue
            .peek(usize::MAX)
            .unwrap()
            .into_iter()
            .map(|m| m.id.to_string())
            .collect()
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let store = Arc::new(DurableStore::open_in_memory().unwrap());
        assert!(matches!(
            MutationQueue::new(store, 0),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn peek_is_ordered_by_created_at() {
        let queue = queue(10);
        queue.enqueue(mutation("b", 2000)).unwrap();
        queue.enqueue(mutation("a", 1000)).unwrap();

        assert_eq!(peek_ids(&queue), ["a", "b"]);
        assert_eq!(queue.peek(1).unwrap().len(), 1);
    }

    #[test]
    fn reenqueue_replaces_and_resets_retries() {
        let queue = queue(10);
        assert_eq!(
            queue.enqueue(mutation("a", 1)).unwrap(),
            EnqueueOutcome::Inserted
        );
        queue.increment_retry("a").unwrap();

        assert_eq!(
            queue.enqueue(mutation("a", 1)).unwrap(),
            EnqueueOutcome::Replaced
        );
        assert_eq!(queue.queue_size().unwrap(), 1);
        assert_eq!(queue.get("a").unwrap().unwrap().retry_count, 0);
    }

    #[test]
    fn full_queue_evicts_oldest() {
        let queue = queue(3);
        queue.enqueue(mutation("m2", 20)).unwrap();
        queue.enqueue(mutation("m1", 10)).unwrap();
        queue.enqueue(mutation("m3", 30)).unwrap();

        let outcome = queue.enqueue(mutation("m4", 5)).unwrap();
        match outcome {
            EnqueueOutcome::Evicted(evicted) => {
                assert_eq!(evicted.len(), 1);
                assert_eq!(evicted[0].id.as_str(), "m1");
            }
            other => panic!("expected eviction, got {other:?}"),
        }
        assert_eq!(peek_ids(&queue), ["m4", "m2", "m3"]);
    }

    #[test]
    fn replace_at_capacity_does_not_evict() {
        let queue = queue(2);
        queue.enqueue(mutation("a", 1)).unwrap();
        queue.enqueue(mutation("b", 2)).unwrap();

        assert_eq!(
            queue.enqueue(mutation("b", 3)).unwrap(),
            EnqueueOutcome::Replaced
        );
        assert_eq!(peek_ids(&queue), ["a", "b"]);
    }

    #[test]
    fn smaller_capacity_trims_to_fit() {
        let store = Arc::new(DurableStore::open_in_memory().unwrap());
        let wide = MutationQueue::new(Arc::clone(&store), 10).unwrap();
        for i in 0..5 {
            wide.enqueue(mutation(&format!("m{i}"), i)).unwrap();
        }

        let narrow = MutationQueue::new(store, 3).unwrap();
        match narrow.enqueue(mutation("new", 100)).unwrap() {
            EnqueueOutcome::Evicted(evicted) => assert_eq!(evicted.len(), 3),
            other => panic!("expected eviction, got {other:?}"),
        }
        assert_eq!(peek_ids(&narrow), ["m3", "m4", "new"]);
    }

    #[test]
    fn dequeue_is_idempotent() {
        let queue = queue(10);
        queue.enqueue(mutation("a", 1)).unwrap();
        queue.dequeue("a").unwrap();
        queue.dequeue("a").unwrap();
        queue.dequeue("never").unwrap();
        assert_eq!(queue.queue_size().unwrap(), 0);
    }

    #[test]
    fn increment_retry_counts_up() {
        let queue = queue(10);
        queue.enqueue(mutation("a", 1)).unwrap();

        assert_eq!(queue.increment_retry("a").unwrap(), Some(1));
        assert_eq!(queue.increment_retry("a").unwrap(), Some(2));
        assert_eq!(queue.increment_retry("missing").unwrap(), None);
        assert_eq!(queue.queue_size().unwrap(), 1);
        assert_eq!(queue.exhausted(2).unwrap(), vec![MutationId::new("a")]);
    }

    #[test]
    fn enqueue_refuses_conflicted_id() {
        let store = Arc::new(DurableStore::open_in_memory().unwrap());
        let queue = MutationQueue::new(Arc::clone(&store), 10).unwrap();
        queue.enqueue(mutation("x", 1)).unwrap();
        store
            .write(|txn| {
                let m = txn.get("x").cloned().unwrap();
                txn.put_conflict(m, ConflictReason::MaxRetriesExceeded, 2);
                Ok(())
            })
            .unwrap();

        assert!(matches!(
            queue.enqueue(mutation("x", 3)),
            Err(CoreError::AlreadyConflicted(_))
        ));
        assert_eq!(queue.queue_size().unwrap(), 0);
    }

    #[test]
    fn clear_all_empties_queue() {
        let queue = queue(10);
        for i in 0..4 {
            queue.enqueue(mutation(&format!("m{i}"), i)).unwrap();
        }
        assert_eq!(queue.clear_all().unwrap(), 4);
        assert_eq!(queue.queue_size().unwrap(), 0);
        assert_eq!(queue.clear_all().unwrap(), 0);
    }

    #[test]
    fn complete_removes_the_replayed_entry() {
        let queue = queue(10);
        queue.enqueue(mutation("a", 1)).unwrap();
        let replayed = queue.get("a").unwrap().unwrap();

        assert!(queue.complete(&replayed).unwrap());
        assert!(!queue.complete(&replayed).unwrap());
        assert_eq!(queue.queue_size().unwrap(), 0);
    }

    #[test]
    fn complete_keeps_an_entry_replaced_mid_replay() {
        let queue = queue(10);
        queue.enqueue(mutation("a", 1)).unwrap();
        let replayed = queue.get("a").unwrap().unwrap();

        queue
            .enqueue(NewMutation::new("a", "UpdateNote", "mutation { v2 }", 2))
            .unwrap();

        assert!(!queue.complete(&replayed).unwrap());
        let current = queue.get("a").unwrap().unwrap();
        assert_eq!(current.query, "mutation { v2 }");
        assert_eq!(current.retry_count, 0);
    }

    #[test]
    fn failures_count_up_then_escalate_in_one_commit() {
        let store = Arc::new(DurableStore::open_in_memory().unwrap());
        let queue = MutationQueue::new(Arc::clone(&store), 10).unwrap();
        queue.enqueue(mutation("x", 1)).unwrap();

        for expected in 1..3 {
            let replayed = queue.get("x").unwrap().unwrap();
            assert_eq!(
                queue.record_failure(&replayed, 3, 50).unwrap(),
                FailureOutcome::Retrying(expected)
            );
        }

        let commits = store.stats().unwrap().commits_since_open;
        let replayed = queue.get("x").unwrap().unwrap();
        match queue.record_failure(&replayed, 3, 50).unwrap() {
            FailureOutcome::Escalated(conflict) => {
                assert_eq!(conflict.mutation.retry_count, 3);
                assert_eq!(conflict.moved_at, 50);
            }
            other => panic!("expected escalation, got {other:?}"),
        }
        assert_eq!(store.stats().unwrap().commits_since_open, commits + 1);
        assert_eq!(queue.queue_size().unwrap(), 0);
        assert_eq!(store.get_conflict("x").unwrap().unwrap().mutation.retry_count, 3);
    }

    #[test]
    fn failure_of_a_replaced_entry_is_dropped() {
        let queue = queue(10);
        queue.enqueue(mutation("x", 1)).unwrap();
        queue.increment_retry("x").unwrap();
        queue.increment_retry("x").unwrap();
        let replayed = queue.get("x").unwrap().unwrap();

        queue.enqueue(mutation("x", 2)).unwrap();

        assert_eq!(
            queue.record_failure(&replayed, 3, 50).unwrap(),
            FailureOutcome::Superseded
        );
        let current = queue.get("x").unwrap().unwrap();
        assert_eq!(current.created_at, 2);
        assert_eq!(current.retry_count, 0);
    }

    #[test]
    fn failure_of_a_dequeued_entry_is_dropped() {
        let queue = queue(10);
        queue.enqueue(mutation("x", 1)).unwrap();
        let replayed = queue.get("x").unwrap().unwrap();
        queue.dequeue("x").unwrap();

        assert_eq!(
            queue.record_failure(&replayed, 1, 50).unwrap(),
            FailureOutcome::Superseded
        );
        assert_eq!(queue.queue_size().unwrap(), 0);
    }
}
