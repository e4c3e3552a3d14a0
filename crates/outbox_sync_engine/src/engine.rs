//! Sync engine: replays queued mutations when the device is online.
//!
//! One engine owns one queue. A recurring task fires every poll interval and
//! triggers a replay cycle; hosts may also trigger cycles with
//! [`SyncEngine::sync_now`]. At most one cycle runs at a time.
//!
//! ## Cycle
//!
//! 1. Probe connectivity; skip the cycle if offline.
//! 2. Skip if the queue is empty.
//! 3. Emit `syncing`, then replay up to `batch_size` mutations oldest first.
//! 4. A success dequeues the mutation. A failure bumps its retry count; once
//!    the count reaches the budget the mutation moves to the conflict store.
//! 5. Emit `error` if anything failed, else `idle`.
//!
//! After [`SyncEngine::dispose`] no cycle touches the queue or emits, even if
//! one was already waiting on the network.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityProbe;
use crate::error::SyncError;
use crate::status::{StatusChannel, StatusUpdate, Subscription, SyncStatus};
use crate::transport::{ReplayRequest, ReplayTransport};
use outbox_core::{
    now_millis, ConflictReason, ConflictStore, ConflictedMutation, CoreError, CoreResult,
    DurableStore, EnqueueOutcome, FailureOutcome, MutationId, MutationQueue, NewMutation,
    QueuedMutation, Timestamp,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Not started, or disposed.
    Stopped,
    /// Started and waiting for the next cycle.
    Idle,
    /// A replay cycle is running.
    Syncing,
}

/// Why a cycle did no replay work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The engine was disposed before the cycle began.
    Disposed,
    /// Another cycle was in flight.
    AlreadyRunning,
    /// Connectivity reported offline.
    Offline,
    /// The connectivity probe failed or timed out.
    ConnectivityError,
    /// Nothing to replay.
    QueueEmpty,
    /// The store failed; state is left for the next cycle.
    StorageError,
    /// The engine was disposed while the cycle was waiting.
    DisposedMidCycle,
}

/// Summary of a completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Mutations sent to the transport.
    pub attempted: usize,
    /// Mutations the endpoint applied.
    pub succeeded: usize,
    /// Failed attempts.
    pub failed: usize,
    /// Mutations moved to the conflict store.
    pub escalated: Vec<MutationId>,
    /// Queue size after the cycle.
    pub pending: usize,
}

/// Result of [`SyncEngine::sync_now`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle ended before replaying anything, or was cut short.
    Skipped(SkipReason),
    /// The batch was processed.
    Completed(CycleReport),
}

impl CycleOutcome {
    /// Returns the report of a completed cycle.
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            CycleOutcome::Completed(report) => Some(report),
            CycleOutcome::Skipped(_) => None,
        }
    }

    /// Returns the skip reason of a skipped cycle.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            CycleOutcome::Skipped(reason) => Some(*reason),
            CycleOutcome::Completed(_) => None,
        }
    }
}

/// Counters across the engine's lifetime.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that processed a batch.
    pub cycles_completed: u64,
    /// Cycles that were skipped.
    pub cycles_skipped: u64,
    /// Mutations the endpoint applied.
    pub mutations_replayed: u64,
    /// Failed replay attempts.
    pub failed_attempts: u64,
    /// Mutations moved to the conflict store.
    pub mutations_escalated: u64,
    /// Wall-clock end of the last completed cycle.
    pub last_cycle_at: Option<Timestamp>,
    /// Last replay or storage error.
    pub last_error: Option<String>,
}

/// Releases the in-flight flag when the cycle ends, including when the
/// cycle's future is dropped.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Replays the mutation queue against a remote endpoint.
pub struct SyncEngine<T: ReplayTransport, C: ConnectivityProbe> {
    config: SyncConfig,
    store: Arc<DurableStore>,
    queue: MutationQueue,
    conflicts: ConflictStore,
    transport: T,
    connectivity: C,
    status: StatusChannel,
    state: Mutex<EngineState>,
    stats: Mutex<SyncStats>,
    task: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
    cycle_in_flight: AtomicBool,
}

impl<T, C> SyncEngine<T, C>
where
    T: ReplayTransport + 'static,
    C: ConnectivityProbe + 'static,
{
    /// Creates an engine over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for a zero poll interval,
    /// batch size, or queue capacity.
    pub fn new(
        config: SyncConfig,
        store: Arc<DurableStore>,
        transport: T,
        connectivity: C,
    ) -> CoreResult<Arc<Self>> {
        if config.poll_interval.is_zero() {
            return Err(CoreError::invalid_argument("poll interval must be non-zero"));
        }
        if config.batch_size == 0 {
            return Err(CoreError::invalid_argument("batch size must be at least 1"));
        }

        let queue = MutationQueue::new(Arc::clone(&store), config.max_queue_size)?;
        let conflicts = ConflictStore::new(Arc::clone(&store));

        Ok(Arc::new(Self {
            config,
            store,
            queue,
            conflicts,
            transport,
            connectivity,
            status: StatusChannel::new(),
            state: Mutex::new(EngineState::Stopped),
            stats: Mutex::new(SyncStats::default()),
            task: Mutex::new(None),
            disposed: AtomicBool::new(false),
            cycle_in_flight: AtomicBool::new(false),
        }))
    }

    /// Starts the recurring replay task. The first cycle runs immediately.
    ///
    /// Before scheduling, any queued mutation whose retry count already
    /// reached the budget (left behind by a crash between a failed attempt
    /// and its escalation) is moved to the conflict store.
    ///
    /// A no-op after [`Self::dispose`] or if already started. Must be called
    /// from within a Tokio runtime; otherwise it logs an error and the engine
    /// stays stopped.
    pub fn start(self: &Arc<Self>) {
        if self.is_disposed() {
            debug!("start ignored, engine disposed");
            return;
        }

        let mut task = self.task.lock();
        if task.is_some() {
            warn!("sync engine already started");
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "sync engine needs a tokio runtime to start");
                return;
            }
        };

        let recovered = self.recover();
        if recovered > 0 {
            info!(recovered, "escalated exhausted mutations left from a previous run");
        }

        *self.state.lock() = EngineState::Idle;
        let period = self.config.poll_interval;
        *task = Some(runtime.spawn(run_timer(Arc::downgrade(self), period)));
        info!(
            poll_interval_ms = period.as_millis() as u64,
            batch_size = self.config.batch_size,
            max_retries = self.config.retry.max_retries,
            "sync engine started"
        );
    }

    /// Moves every queued mutation whose retry budget is used up to the
    /// conflict store. Returns how many were moved.
    pub fn recover(&self) -> usize {
        let exhausted = match self.queue.exhausted(self.config.retry.max_retries) {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "failed to scan queue for exhausted mutations");
                return 0;
            }
        };

        let mut moved = 0;
        for id in exhausted {
            match self
                .conflicts
                .escalate(id.as_str(), ConflictReason::MaxRetriesExceeded, now_millis())
            {
                Ok(Some(_)) => moved += 1,
                Ok(None) => {}
                Err(e) => {
                    error!(mutation_id = %id, error = %e, "failed to escalate exhausted mutation");
                    break;
                }
            }
        }
        self.stats.lock().mutations_escalated += moved as u64;
        moved
    }

    /// Stops the engine for good.
    ///
    /// Cancels the recurring task and drops every status listener. A cycle
    /// already waiting on the network finishes without touching the queue or
    /// emitting. Safe to call more than once.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.status.clear();
        *self.state.lock() = EngineState::Stopped;
        info!("sync engine disposed");
    }

    /// Returns true once [`Self::dispose`] has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Engine counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.lock().clone()
    }

    /// The configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    /// The replay transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The connectivity probe.
    pub fn connectivity(&self) -> &C {
        &self.connectivity
    }

    /// Registers a status listener.
    pub fn add_status_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(SyncStatus, usize) + Send + Sync + 'static,
    {
        self.status.subscribe(listener)
    }

    /// The most recent status emission.
    pub fn last_status(&self) -> Option<StatusUpdate> {
        self.status.last()
    }

    /// Persists a mutation and reports the new pending count as `idle`.
    ///
    /// On a disposed engine the mutation is still persisted but nothing is
    /// emitted. A storage failure emits `error` and is returned.
    pub fn enqueue_offline_mutation(&self, mutation: NewMutation) -> CoreResult<EnqueueOutcome> {
        let id = mutation.id.clone();
        match self.queue.enqueue(mutation) {
            Ok(outcome) => {
                if !self.is_disposed() {
                    self.status.emit(SyncStatus::Idle, self.pending_count());
                }
                Ok(outcome)
            }
            Err(e) => {
                warn!(mutation_id = %id, error = %e, "failed to enqueue mutation");
                self.stats.lock().last_error = Some(e.to_string());
                if !self.is_disposed() {
                    self.status.emit(SyncStatus::Error, self.pending_count());
                }
                Err(e)
            }
        }
    }

    /// Number of queued mutations, or zero if the store fails.
    pub fn pending_count(&self) -> usize {
        self.queue.queue_size().unwrap_or_else(|e| {
            warn!(error = %e, "failed to read queue size");
            0
        })
    }

    /// Up to `limit` queued mutations, oldest first.
    pub fn peek(&self, limit: usize) -> Vec<QueuedMutation> {
        self.queue.peek(limit).unwrap_or_else(|e| {
            warn!(error = %e, "failed to read queue");
            Vec::new()
        })
    }

    /// All conflicts in escalation order.
    pub fn get_conflicts(&self) -> Vec<ConflictedMutation> {
        self.conflicts.get_conflicts().unwrap_or_else(|e| {
            warn!(error = %e, "failed to read conflicts");
            Vec::new()
        })
    }

    /// Number of conflicts.
    pub fn conflict_count(&self) -> usize {
        self.conflicts.conflict_count().unwrap_or_else(|e| {
            warn!(error = %e, "failed to count conflicts");
            0
        })
    }

    /// Acknowledges a conflict. Returns whether one was removed.
    pub fn resolve_conflict(&self, id: &str) -> bool {
        self.conflicts.resolve_conflict(id).unwrap_or_else(|e| {
            warn!(mutation_id = id, error = %e, "failed to resolve conflict");
            false
        })
    }

    /// Acknowledges every conflict. Returns how many were removed.
    pub fn resolve_all_conflicts(&self) -> usize {
        self.conflicts.resolve_all().unwrap_or_else(|e| {
            warn!(error = %e, "failed to resolve conflicts");
            0
        })
    }

    /// Runs one replay cycle now.
    ///
    /// Returns [`SkipReason::AlreadyRunning`] if another cycle is in flight.
    pub async fn sync_now(&self) -> CycleOutcome {
        if self.is_disposed() {
            return self.skipped(SkipReason::Disposed);
        }
        let Some(_guard) = CycleGuard::acquire(&self.cycle_in_flight) else {
            debug!("replay cycle already in flight");
            return self.skipped(SkipReason::AlreadyRunning);
        };

        let outcome = self.run_cycle().await;
        match &outcome {
            CycleOutcome::Completed(report) => {
                let mut stats = self.stats.lock();
                stats.cycles_completed += 1;
                stats.mutations_replayed += report.succeeded as u64;
                stats.failed_attempts += report.failed as u64;
                stats.mutations_escalated += report.escalated.len() as u64;
                stats.last_cycle_at = Some(now_millis());
            }
            CycleOutcome::Skipped(reason) => {
                self.stats.lock().cycles_skipped += 1;
                debug!(?reason, "replay cycle skipped");
            }
        }
        outcome
    }

    fn skipped(&self, reason: SkipReason) -> CycleOutcome {
        self.stats.lock().cycles_skipped += 1;
        CycleOutcome::Skipped(reason)
    }

    async fn run_cycle(&self) -> CycleOutcome {
        let probe = timeout(self.config.connectivity_timeout, self.connectivity.check()).await;
        if self.is_disposed() {
            return CycleOutcome::Skipped(SkipReason::DisposedMidCycle);
        }
        match probe {
            Ok(Ok(connectivity)) if connectivity.is_online() => {}
            Ok(Ok(connectivity)) => {
                debug!(
                    is_connected = connectivity.is_connected,
                    is_internet_reachable = connectivity.is_internet_reachable,
                    "offline, skipping replay"
                );
                return CycleOutcome::Skipped(SkipReason::Offline);
            }
            Ok(Err(e)) => {
                warn!(error = %e, "connectivity check failed");
                return CycleOutcome::Skipped(SkipReason::ConnectivityError);
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.connectivity_timeout.as_millis() as u64,
                    "connectivity check timed out"
                );
                return CycleOutcome::Skipped(SkipReason::ConnectivityError);
            }
        }

        let pending = match self.queue.queue_size() {
            Ok(0) => return CycleOutcome::Skipped(SkipReason::QueueEmpty),
            Ok(pending) => pending,
            Err(e) => return self.storage_failure(e),
        };
        let batch = match self.queue.peek(self.config.batch_size) {
            Ok(batch) => batch,
            Err(e) => return self.storage_failure(e),
        };

        self.set_state(EngineState::Syncing);
        self.status.emit(SyncStatus::Syncing, pending);
        info!(pending, batch = batch.len(), "replay cycle started");

        let mut report = CycleReport::default();
        for mutation in batch {
            if self.is_disposed() {
                return CycleOutcome::Skipped(SkipReason::DisposedMidCycle);
            }

            report.attempted += 1;
            let request = ReplayRequest::from(&mutation);
            let result = match timeout(self.config.replay_timeout, self.transport.execute(&request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout),
            };

            if self.is_disposed() {
                debug!(mutation_id = %mutation.id, "engine disposed during replay, result dropped");
                return CycleOutcome::Skipped(SkipReason::DisposedMidCycle);
            }

            let recorded = match result {
                Ok(()) => self.record_success(&mutation, &mut report),
                Err(e) => self.record_failure(&mutation, &e, &mut report),
            };
            if let Err(e) = recorded {
                return self.storage_failure(e);
            }
        }

        report.pending = match self.queue.queue_size() {
            Ok(pending) => pending,
            Err(e) => return self.storage_failure(e),
        };

        if self.is_disposed() {
            return CycleOutcome::Skipped(SkipReason::DisposedMidCycle);
        }

        let status = if report.failed > 0 {
            SyncStatus::Error
        } else {
            SyncStatus::Idle
        };
        self.finish_cycle();
        self.status.emit(status, report.pending);
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            escalated = report.escalated.len(),
            pending = report.pending,
            "replay cycle finished"
        );
        CycleOutcome::Completed(report)
    }

    fn record_success(&self, mutation: &QueuedMutation, report: &mut CycleReport) -> CoreResult<()> {
        report.succeeded += 1;
        if self.queue.complete(mutation)? {
            debug!(mutation_id = %mutation.id, operation = %mutation.operation_name, "replayed mutation");
        } else {
            debug!(mutation_id = %mutation.id, "replayed entry superseded, newer version stays queued");
        }
        Ok(())
    }

    fn record_failure(
        &self,
        mutation: &QueuedMutation,
        failure: &SyncError,
        report: &mut CycleReport,
    ) -> CoreResult<()> {
        report.failed += 1;
        self.stats.lock().last_error = Some(failure.to_string());

        let max_retries = self.config.retry.max_retries;
        match self.queue.record_failure(mutation, max_retries, now_millis())? {
            FailureOutcome::Retrying(retry_count) => warn!(
                mutation_id = %mutation.id,
                retry_count,
                retryable = failure.is_retryable(),
                error = %failure,
                "replay attempt failed"
            ),
            FailureOutcome::Escalated(conflict) => {
                warn!(
                    mutation_id = %mutation.id,
                    retryable = failure.is_retryable(),
                    error = %failure,
                    "final replay attempt failed"
                );
                report.escalated.push(conflict.mutation.id);
            }
            FailureOutcome::Superseded => {}
        }
        Ok(())
    }

    fn storage_failure(&self, e: CoreError) -> CycleOutcome {
        error!(error = %e, "store failed during replay cycle");
        self.stats.lock().last_error = Some(e.to_string());
        self.finish_cycle();
        if !self.is_disposed() {
            let pending = self.queue.queue_size().unwrap_or(0);
            self.status.emit(SyncStatus::Error, pending);
        }
        CycleOutcome::Skipped(SkipReason::StorageError)
    }

    fn set_state(&self, state: EngineState) {
        let mut current = self.state.lock();
        if !self.is_disposed() {
            *current = state;
        }
    }

    /// Leaves `Syncing` for the resting state: `Idle` once started,
    /// `Stopped` for on-demand cycles on an engine never started.
    fn finish_cycle(&self) {
        let started = self.task.lock().is_some();
        let mut state = self.state.lock();
        if *state == EngineState::Syncing && !self.is_disposed() {
            *state = if started {
                EngineState::Idle
            } else {
                EngineState::Stopped
            };
        }
    }
}

impl<T: ReplayTransport, C: ConnectivityProbe> Drop for SyncEngine<T, C> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Fires a cycle every `period` until the engine is dropped or disposed.
///
/// Each cycle runs in its own task so that cancelling this loop never
/// cancels an in-flight replay call; overlapping cycles are rejected by the
/// engine's in-flight guard.
async fn run_timer<T, C>(engine: Weak<SyncEngine<T, C>>, period: Duration)
where
    T: ReplayTransport + 'static,
    C: ConnectivityProbe + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(engine) = engine.upgrade() else {
            break;
        };
        if engine.is_disposed() {
            break;
        }
        tokio::spawn(async move {
            engine.sync_now().await;
        });
    }
}
