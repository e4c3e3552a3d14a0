//! Durable store backing the mutation queue and the conflict store.
//!
//! The store keeps two keyed tables in memory (queued mutations and
//! conflicts) and writes every change to an append-only commit log first.
//! Changes are grouped into write transactions; each transaction becomes a
//! single log frame, so a crash never leaves half of one applied.

use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::log::{scan, LogOp, LogWriter};
use crate::tables::Tables;
use crate::types::{ConflictReason, ConflictedMutation, MutationId, QueuedMutation, Timestamp};
use outbox_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info, warn};

/// Counters describing a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Mutations currently queued.
    pub queued: usize,
    /// Conflicts currently recorded.
    pub conflicts: usize,
    /// Size of the commit log in bytes.
    pub log_bytes: u64,
    /// Commits replayed from the log when the store was opened.
    pub replayed_commits: u64,
    /// Commits written since the store was opened.
    pub commits_since_open: u64,
    /// Compactions performed since the store was opened.
    pub compactions: u64,
}

struct Inner {
    log: LogWriter,
    tables: Tables,
    dir: Option<StoreDir>,
    closed: bool,
    replayed_commits: u64,
    commits_since_open: u64,
    compactions: u64,
    compacted_size: u64,
}

impl Inner {
    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed {
            Err(CoreError::StoreClosed)
        } else {
            Ok(())
        }
    }
}

/// A durable, process-local store for queued and conflicted mutations.
///
/// Every public method is atomic with respect to every other: reads never
/// observe a transaction half applied.
///
/// # Example
///
/// ```rust
/// use outbox_core::{DurableStore, NewMutation};
///
/// let store = DurableStore::open_in_memory().unwrap();
/// store
///     .write(|txn| {
///         txn.put(NewMutation::new("m1", "CreateNote", "mutation { n }", 1).into());
///         Ok(())
///     })
///     .unwrap();
/// assert_eq!(store.queued_count().unwrap(), 1);
/// ```
pub struct DurableStore {
    config: StoreConfig,
    inner: Mutex<Inner>,
}

impl DurableStore {
    /// Opens (or creates) an on-disk store in `path`.
    ///
    /// Takes an exclusive lock on the directory and replays the commit log.
    pub fn open(path: &Path, config: StoreConfig) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let backend = FileBackend::open(&dir.log_path())?;
        info!(path = %path.display(), "opening outbox store");
        Self::from_parts(config, Box::new(backend), Some(dir))
    }

    /// Opens an ephemeral store.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(StoreConfig::default(), Box::new(InMemoryBackend::new()))
    }

    /// Opens a store over an arbitrary backend.
    pub fn open_with_backend(
        config: StoreConfig,
        backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        Self::from_parts(config, backend, None)
    }

    fn from_parts(
        config: StoreConfig,
        backend: Box<dyn StorageBackend>,
        dir: Option<StoreDir>,
    ) -> CoreResult<Self> {
        let recovered = scan(backend.as_ref())?;
        let next_sequence = recovered.next_sequence();

        let mut log = LogWriter::new(backend, config.sync_on_write, next_sequence);
        if let Some(torn) = &recovered.torn {
            warn!(
                offset = torn.offset,
                dropped_bytes = torn.dropped_bytes,
                reason = %torn.reason,
                "discarding torn tail of commit log"
            );
            log.truncate(recovered.valid_len)?;
        }

        let mut tables = Tables::default();
        let commits = recovered.entries.len();
        for (_, entry) in recovered.entries {
            for op in entry.ops {
                tables.apply(op);
            }
        }

        debug!(
            commits,
            queued = tables.queue_len(),
            conflicts = tables.conflict_len(),
            "replayed commit log"
        );

        Ok(Self {
            config,
            inner: Mutex::new(Inner {
                log,
                tables,
                dir,
                closed: false,
                replayed_commits: commits as u64,
                commits_since_open: 0,
                compactions: 0,
                compacted_size: recovered.valid_len,
            }),
        })
    }

    /// Runs a write transaction.
    ///
    /// The closure reads the committed state and stages changes. If it
    /// returns `Ok`, every staged change is written as one commit and then
    /// applied; if it returns `Err`, nothing is written.
    pub fn write<F, R>(&self, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> CoreResult<R>,
    {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;

        let (result, ops) = {
            let mut txn = WriteTxn {
                tables: &inner.tables,
                ops: Vec::new(),
            };
            let result = f(&mut txn)?;
            (result, txn.ops)
        };

        if ops.is_empty() {
            return Ok(result);
        }

        inner.log.append(ops.clone())?;
        for op in ops {
            inner.tables.apply(op);
        }
        inner.commits_since_open += 1;

        self.maybe_compact(&mut inner);
        Ok(result)
    }

    /// Number of queued mutations.
    pub fn queued_count(&self) -> CoreResult<usize> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.tables.queue_len())
    }

    /// Up to `limit` queued mutations, oldest first.
    pub fn peek(&self, limit: usize) -> CoreResult<Vec<QueuedMutation>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.tables.queued().take(limit).cloned().collect())
    }

    /// Returns a queued mutation by id.
    pub fn get(&self, id: &str) -> CoreResult<Option<QueuedMutation>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.tables.get(id).cloned())
    }

    /// Ids of queued mutations whose retry count reached `max_retries`, oldest first.
    pub fn exhausted(&self, max_retries: u32) -> CoreResult<Vec<MutationId>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner
            .tables
            .queued()
            .filter(|m| m.retry_count >= max_retries)
            .map(|m| m.id.clone())
            .collect())
    }

    /// Number of recorded conflicts.
    pub fn conflict_count(&self) -> CoreResult<usize> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.tables.conflict_len())
    }

    /// All conflicts in escalation order.
    pub fn conflicts(&self) -> CoreResult<Vec<ConflictedMutation>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.tables.conflicts().cloned().collect())
    }

    /// Returns a conflict by id.
    pub fn get_conflict(&self, id: &str) -> CoreResult<Option<ConflictedMutation>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.tables.get_conflict(id).cloned())
    }

    /// Returns store counters.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(StoreStats {
            queued: inner.tables.queue_len(),
            conflicts: inner.tables.conflict_len(),
            log_bytes: inner.log.size()?,
            replayed_commits: inner.replayed_commits,
            commits_since_open: inner.commits_since_open,
            compactions: inner.compactions,
        })
    }

    /// Rewrites the commit log as a single snapshot of the live state.
    ///
    /// On disk the snapshot is written to a temporary file, synced, and
    /// renamed over the log, so a crash leaves either the old or the new
    /// log in place.
    pub fn compact(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        Self::compact_locked(&mut inner)
    }

    fn compact_locked(inner: &mut Inner) -> CoreResult<()> {
        let before = inner.log.size()?;
        let ops = inner.tables.snapshot_ops();

        match &inner.dir {
            Some(dir) => {
                let frame = inner.log.snapshot_frame(ops)?;
                let temp_path = dir.temp_log_path();
                {
                    let mut image = FileBackend::create_empty(&temp_path)?;
                    image.append(&frame)?;
                    image.flush()?;
                    image.sync()?;
                }
                dir.install_temp_log()?;
                let reopened = FileBackend::open(&dir.log_path())?;
                inner.log.replace_backend(Box::new(reopened));
                inner.log.advance_sequence();
            }
            None => inner.log.rewrite_in_place(ops)?,
        }

        let after = inner.log.size()?;
        inner.compactions += 1;
        inner.compacted_size = after;
        info!(before, after, "compacted commit log");
        Ok(())
    }

    fn maybe_compact(&self, inner: &mut Inner) {
        let threshold = self.config.compact_threshold_bytes;
        if threshold == 0 {
            return;
        }
        let size = match inner.log.size() {
            Ok(size) => size,
            Err(_) => return,
        };
        if size > threshold && size > inner.compacted_size.saturating_mul(2) {
            if let Err(e) = Self::compact_locked(inner) {
                warn!(error = %e, "automatic compaction failed");
            }
        }
    }

    /// Flushes the log and closes the store. Later calls return
    /// [`CoreError::StoreClosed`]. Closing twice is a no-op.
    pub fn close(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner.log.sync()?;
        inner.closed = true;
        inner.dir = None;
        debug!("closed outbox store");
        Ok(())
    }

    /// Returns true once [`Self::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// A write transaction handed to [`DurableStore::write`].
///
/// Reads reflect the state before the transaction; staged changes become
/// visible once the transaction commits.
pub struct WriteTxn<'a> {
    tables: &'a Tables,
    ops: Vec<LogOp>,
}

impl WriteTxn<'_> {
    /// Number of queued mutations.
    pub fn queue_len(&self) -> usize {
        self.tables.queue_len()
    }

    /// Returns a queued mutation by id.
    pub fn get(&self, id: &str) -> Option<&QueuedMutation> {
        self.tables.get(id)
    }

    /// Queued mutations, oldest first.
    pub fn queued(&self) -> impl Iterator<Item = &QueuedMutation> {
        self.tables.queued()
    }

    /// Number of conflicts.
    pub fn conflict_len(&self) -> usize {
        self.tables.conflict_len()
    }

    /// Returns a conflict by id.
    pub fn get_conflict(&self, id: &str) -> Option<&ConflictedMutation> {
        self.tables.get_conflict(id)
    }

    /// Stages an insert or replace of a queued mutation.
    pub fn put(&mut self, mutation: QueuedMutation) {
        self.ops.push(LogOp::Put(mutation));
    }

    /// Stages removal of a queued mutation.
    pub fn delete(&mut self, id: MutationId) {
        self.ops.push(LogOp::Delete(id));
    }

    /// Stages a new retry count.
    pub fn set_retry(&mut self, id: MutationId, retry_count: u32) {
        self.ops.push(LogOp::SetRetry { id, retry_count });
    }

    /// Stages a conflict; the id leaves the queue in the same commit.
    pub fn put_conflict(
        &mut self,
        mutation: QueuedMutation,
        reason: ConflictReason,
        moved_at: Timestamp,
    ) {
        self.ops.push(LogOp::PutConflict {
            mutation,
            reason,
            moved_at,
        });
    }

    /// Stages removal of a conflict.
    pub fn delete_conflict(&mut self, id: MutationId) {
        self.ops.push(LogOp::DeleteConflict(id));
    }

    /// Stages removal of every queued mutation.
    pub fn clear_queue(&mut self) {
        self.ops.push(LogOp::ClearQueue);
    }

    /// Stages removal of every conflict.
    pub fn clear_conflicts(&mut self) {
        self.ops.push(LogOp::ClearConflicts);
    }
}
