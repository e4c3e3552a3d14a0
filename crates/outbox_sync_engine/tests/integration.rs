//! Integration tests for the sync engine, run on a paused Tokio clock.

use outbox_core::{DurableStore, MutationQueue, NewMutation, StoreConfig};
use outbox_sync_engine::{
    CycleOutcome, EngineState, MockConnectivity, MockOutcome, MockTransport, RetryPolicy,
    SkipReason, SyncConfig, SyncEngine, SyncStatus,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

type Engine = SyncEngine<MockTransport, MockConnectivity>;
type Emissions = Arc<Mutex<Vec<(SyncStatus, usize)>>>;

const POLL: Duration = Duration::from_secs(30);

fn engine_with(config: SyncConfig, transport: MockTransport, online: bool) -> Arc<Engine> {
    let store = Arc::new(DurableStore::open_in_memory().unwrap());
    let connectivity = if online {
        MockConnectivity::online()
    } else {
        MockConnectivity::offline()
    };
    SyncEngine::new(config, store, transport, connectivity).unwrap()
}

fn engine() -> Arc<Engine> {
    engine_with(SyncConfig::default(), MockTransport::new(), true)
}

fn mutation(id: &str, created_at: u64) -> NewMutation {
    NewMutation::new(id, "UpdateAnnotation", "mutation UpdateAnnotation { ok }", created_at)
        .with_tenant("tenant-1")
        .with_user("user-1")
}

fn record(engine: &Engine) -> Emissions {
    let seen: Emissions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _subscription = engine.add_status_listener(move |status, pending| {
        sink.lock().push((status, pending));
    });
    seen
}

/// Lets spawned tasks run without advancing the clock far.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn replays_oldest_first() {
    let engine = engine();
    engine.enqueue_offline_mutation(mutation("b", 2000)).unwrap();
    engine.enqueue_offline_mutation(mutation("a", 1000)).unwrap();

    let outcome = engine.sync_now().await;

    assert_eq!(outcome.report().unwrap().succeeded, 2);
    let ids: Vec<_> = engine
        .transport()
        .call_ids()
        .into_iter()
        .map(|id| id.to_string())
        .collect();
    assert_eq!(ids, ["a", "b"]);
    assert_eq!(engine.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cycle_emits_syncing_then_idle() {
    let engine = engine();
    let seen = record(&engine);

    engine.enqueue_offline_mutation(mutation("a", 1)).unwrap();
    engine.sync_now().await;

    assert_eq!(
        *seen.lock(),
        vec![
            (SyncStatus::Idle, 1),
            (SyncStatus::Syncing, 1),
            (SyncStatus::Idle, 0),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn three_failures_escalate_to_conflicts() {
    let engine = engine_with(SyncConfig::default(), MockTransport::failing(), true);
    engine.enqueue_offline_mutation(mutation("x", 1000)).unwrap();

    for attempt in 1..=2 {
        let report = engine.sync_now().await.report().cloned().unwrap();
        assert_eq!(report.failed, 1);
        assert!(report.escalated.is_empty());
        assert_eq!(engine.peek(1)[0].retry_count, attempt);
    }

    let report = engine.sync_now().await.report().cloned().unwrap();
    assert_eq!(report.escalated.len(), 1);
    assert_eq!(report.pending, 0);

    let conflicts = engine.get_conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].id().as_str(), "x");
    assert_eq!(conflicts[0].reason.as_str(), "max_retries_exceeded");
    assert_eq!(engine.pending_count(), 0);
    assert_eq!(engine.last_status().unwrap().status, SyncStatus::Error);

    // Scenario: acknowledging the conflict.
    assert!(engine.resolve_conflict("x"));
    assert!(engine.get_conflicts().is_empty());
    assert_eq!(engine.conflict_count(), 0);

    // Escalated mutations are never replayed again.
    assert_eq!(
        engine.sync_now().await,
        CycleOutcome::Skipped(SkipReason::QueueEmpty)
    );
    assert_eq!(engine.transport().call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn mixed_failure_types_share_one_budget() {
    let transport = MockTransport::new();
    transport.script(
        "x",
        [
            MockOutcome::Failure,
            MockOutcome::Http(503),
            MockOutcome::Graphql("validation failed".into()),
        ],
    );
    let engine = engine_with(SyncConfig::default(), transport, true);
    engine.enqueue_offline_mutation(mutation("x", 1)).unwrap();

    for _ in 0..3 {
        engine.sync_now().await;
    }
    assert_eq!(engine.conflict_count(), 1);
    assert_eq!(engine.stats().failed_attempts, 3);
    assert_eq!(engine.stats().mutations_escalated, 1);
}

#[tokio::test(start_paused = true)]
async fn offline_cycle_touches_nothing() {
    let engine = engine_with(SyncConfig::default(), MockTransport::new(), false);
    engine.enqueue_offline_mutation(mutation("a", 1)).unwrap();
    let seen = record(&engine);
    let before = engine.peek(10);

    assert_eq!(
        engine.sync_now().await,
        CycleOutcome::Skipped(SkipReason::Offline)
    );

    assert_eq!(engine.transport().call_count(), 0);
    assert_eq!(engine.peek(10), before);
    assert!(seen.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn connected_but_unreachable_is_offline() {
    let engine = engine();
    engine
        .connectivity()
        .set_connectivity(outbox_sync_engine::Connectivity {
            is_connected: true,
            is_internet_reachable: false,
        });
    engine.enqueue_offline_mutation(mutation("a", 1)).unwrap();

    assert_eq!(
        engine.sync_now().await.skip_reason(),
        Some(SkipReason::Offline)
    );
    assert_eq!(engine.transport().call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn timer_replays_on_start_and_every_interval() {
    let engine = engine();
    engine.enqueue_offline_mutation(mutation("a", 1)).unwrap();

    engine.start();
    assert_eq!(engine.state(), EngineState::Idle);
    settle().await;
    assert_eq!(engine.pending_count(), 0);

    engine.enqueue_offline_mutation(mutation("b", 2)).unwrap();
    tokio::time::sleep(POLL / 2).await;
    assert_eq!(engine.pending_count(), 1);

    tokio::time::sleep(POLL).await;
    assert_eq!(engine.pending_count(), 0);
    assert_eq!(engine.transport().call_count(), 2);
    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn dispose_before_first_tick_freezes_state() {
    let engine = engine();
    engine.enqueue_offline_mutation(mutation("a", 1)).unwrap();
    let seen = record(&engine);

    engine.start();
    engine.dispose();
    tokio::time::sleep(POLL * 4).await;

    assert!(seen.lock().is_empty());
    assert_eq!(engine.pending_count(), 1);
    assert_eq!(engine.transport().call_count(), 0);
    assert_eq!(engine.connectivity().check_count(), 0);
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn second_start_does_not_duplicate_timer() {
    let engine = engine();
    engine.start();
    engine.start();

    tokio::time::sleep(POLL + Duration::from_secs(1)).await;

    // One timer: ticks at 0s and 30s.
    assert_eq!(engine.connectivity().check_count(), 2);
    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn start_after_dispose_is_noop() {
    let engine = engine();
    engine.dispose();
    engine.start();
    settle().await;

    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(engine.connectivity().check_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_cycle_blocks_overlapping_ticks() {
    let config = SyncConfig::default().with_replay_timeout(Duration::from_secs(120));
    let transport = MockTransport::new();
    transport.set_latency(Some(Duration::from_secs(45)));
    let engine = engine_with(config, transport, true);
    engine.enqueue_offline_mutation(mutation("a", 1)).unwrap();

    engine.start();
    tokio::time::sleep(Duration::from_secs(40)).await;

    // The tick at 30s found the first cycle still waiting on the network.
    assert_eq!(engine.transport().call_count(), 1);
    assert!(engine.stats().cycles_skipped >= 1);
    assert_eq!(engine.state(), EngineState::Syncing);

    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(engine.transport().call_count(), 1);
    assert_eq!(engine.pending_count(), 0);
    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn concurrent_sync_now_is_rejected() {
    let transport = MockTransport::new();
    transport.set_latency(Some(Duration::from_secs(5)));
    let engine = engine_with(SyncConfig::default(), transport, true);
    engine.enqueue_offline_mutation(mutation("a", 1)).unwrap();

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.sync_now().await })
    };
    tokio::task::yield_now().await;

    assert_eq!(
        engine.sync_now().await,
        CycleOutcome::Skipped(SkipReason::AlreadyRunning)
    );
    let outcome = first.await.unwrap();
    assert_eq!(outcome.report().unwrap().succeeded, 1);
}

#[tokio::test(start_paused = true)]
async fn hung_call_counts_as_failure() {
    let config = SyncConfig::default().with_replay_timeout(Duration::from_secs(5));
    let transport = MockTransport::new();
    transport.set_latency(Some(Duration::from_secs(3600)));
    let engine = engine_with(config, transport, true);
    engine.enqueue_offline_mutation(mutation("a", 1)).unwrap();

    let report = engine.sync_now().await.report().cloned().unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(engine.peek(1)[0].retry_count, 1);
    assert!(engine
        .stats()
        .last_error
        .unwrap()
        .contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn dispose_mid_flight_drops_result() {
    let transport = MockTransport::new();
    transport.set_latency(Some(Duration::from_secs(5)));
    let engine = engine_with(SyncConfig::default(), transport, true);
    engine.enqueue_offline_mutation(mutation("a", 1)).unwrap();
    let seen = record(&engine);

    let cycle = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.sync_now().await })
    };
    tokio::task::yield_now().await;
    assert_eq!(engine.transport().call_count(), 1);

    engine.dispose();
    let outcome = cycle.await.unwrap();

    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::DisposedMidCycle));
    assert_eq!(engine.pending_count(), 1);
    assert_eq!(engine.peek(1)[0].retry_count, 0);
    assert_eq!(*seen.lock(), vec![(SyncStatus::Syncing, 1)]);
}

fn versioned(id: &str, query: &str, created_at: u64) -> NewMutation {
    NewMutation::new(id, "UpdateAnnotation", query, created_at)
        .with_tenant("tenant-1")
        .with_user("user-1")
}

fn replayed_queries(engine: &Engine) -> Vec<String> {
    engine
        .transport()
        .calls()
        .into_iter()
        .map(|request| request.query)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn reenqueue_during_successful_replay_keeps_new_version() {
    let transport = MockTransport::new();
    transport.set_latency(Some(Duration::from_secs(5)));
    let engine = engine_with(SyncConfig::default(), transport, true);
    engine.enqueue_offline_mutation(versioned("a", "v1", 1)).unwrap();

    let cycle = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.sync_now().await })
    };
    tokio::task::yield_now().await;
    engine.enqueue_offline_mutation(versioned("a", "v2", 2)).unwrap();
    cycle.await.unwrap();

    assert_eq!(replayed_queries(&engine), ["v1"]);
    assert_eq!(engine.pending_count(), 1);
    let queued = engine.peek(1);
    assert_eq!(queued[0].query, "v2");
    assert_eq!(queued[0].retry_count, 0);

    engine.sync_now().await;
    assert_eq!(replayed_queries(&engine), ["v1", "v2"]);
    assert_eq!(engine.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn reenqueue_during_failed_replay_is_not_charged() {
    let transport = MockTransport::failing();
    transport.set_latency(Some(Duration::from_secs(5)));
    let config = SyncConfig::default().with_retry(RetryPolicy::new(1));
    let engine = engine_with(config, transport, true);
    engine.enqueue_offline_mutation(versioned("a", "v1", 1)).unwrap();

    let cycle = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.sync_now().await })
    };
    tokio::task::yield_now().await;
    engine.enqueue_offline_mutation(versioned("a", "v2", 2)).unwrap();

    let report = cycle.await.unwrap().report().cloned().unwrap();
    assert_eq!(report.failed, 1);
    assert!(report.escalated.is_empty());
    assert_eq!(engine.conflict_count(), 0);

    let queued = engine.peek(1);
    assert_eq!(queued[0].query, "v2");
    assert_eq!(queued[0].retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn enqueue_after_dispose_persists_silently() {
    let engine = engine();
    let seen = record(&engine);
    engine.dispose();

    engine.enqueue_offline_mutation(mutation("late", 1)).unwrap();

    assert_eq!(engine.pending_count(), 1);
    assert!(seen.lock().is_empty());
    assert_eq!(
        engine.sync_now().await,
        CycleOutcome::Skipped(SkipReason::Disposed)
    );
}

#[tokio::test(start_paused = true)]
async fn panicking_listener_does_not_block_others() {
    let engine = engine();
    let _bad = engine.add_status_listener(|_, _| panic!("render failed"));
    let seen = record(&engine);

    engine.enqueue_offline_mutation(mutation("a", 1)).unwrap();
    engine.sync_now().await;

    assert_eq!(seen.lock().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn unsubscribed_listener_stops_receiving() {
    let engine = engine();
    let seen: Emissions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = engine.add_status_listener(move |status, pending| {
        sink.lock().push((status, pending));
    });

    engine.enqueue_offline_mutation(mutation("a", 1)).unwrap();
    subscription.unsubscribe();
    engine.enqueue_offline_mutation(mutation("b", 2)).unwrap();

    assert_eq!(*seen.lock(), vec![(SyncStatus::Idle, 1)]);
}

#[tokio::test(start_paused = true)]
async fn start_recovers_exhausted_mutations_after_restart() {
    let dir = tempdir().unwrap();
    {
        let store = Arc::new(DurableStore::open(dir.path(), StoreConfig::default()).unwrap());
        let queue = MutationQueue::new(Arc::clone(&store), 500).unwrap();
        queue.enqueue(mutation("x", 1)).unwrap();
        queue.enqueue(mutation("y", 2)).unwrap();
        // Crash after the third failure was recorded but before escalation.
        for _ in 0..3 {
            queue.increment_retry("x").unwrap();
        }
        store.close().unwrap();
    }

    let store = Arc::new(DurableStore::open(dir.path(), StoreConfig::default()).unwrap());
    let connectivity = MockConnectivity::offline();
    let engine =
        SyncEngine::new(SyncConfig::default(), store, MockTransport::new(), connectivity).unwrap();

    engine.start();

    assert_eq!(engine.conflict_count(), 1);
    assert_eq!(engine.get_conflicts()[0].id().as_str(), "x");
    assert_eq!(engine.pending_count(), 1);
    engine.dispose();
}
