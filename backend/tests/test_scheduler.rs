//! Tests for the cycle scheduler
//!
//! Uses paused tokio time: interval ticks and simulated ledger delays advance
//! instantly while the runtime is idle.

use chrono::{TimeZone, Utc};
use reward_distributor_core::core::time::{Clock, ManualClock};
use reward_distributor_core::ledger::{LedgerClient, SimulatedLedger};
use reward_distributor_core::models::cycle::CycleState;
use reward_distributor_core::orchestrator::{CycleEngine, PipelineError, Scheduler, SchedulerSummary, TickOutcome};
use reward_distributor_core::store::{InstanceLock, LockError, MemoryBackend, StateStore};
use reward_distributor_core::DistributorConfig;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

struct Fixture {
    scheduler: Scheduler,
    ledger: Arc<SimulatedLedger>,
    store: Arc<StateStore>,
    backend: Arc<MemoryBackend>,
    // Keeps the lock file's directory alive
    _dir: TempDir,
}

fn fixture(ledger: SimulatedLedger) -> Fixture {
    let mut config = DistributorConfig::new("ops", "treasury");
    config.min_harvest_amount = 20_000;
    config.payout_retry_delay_ms = 0;

    let ledger = Arc::new(ledger);
    let backend = Arc::new(MemoryBackend::new());
    let store = Arc::new(StateStore::new(Arc::clone(&backend)));
    let wall: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 18, 5, 10, 0).unwrap()));
    let dyn_ledger: Arc<dyn LedgerClient> = ledger.clone();
    let engine = CycleEngine::new(config, dyn_ledger, Arc::clone(&store), wall).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let lock = InstanceLock::acquire(dir.path().join("state.lock")).unwrap();
    Fixture {
        scheduler: Scheduler::new(Arc::new(engine), lock),
        ledger,
        store,
        backend,
        _dir: dir,
    }
}

fn distributing_ledger() -> SimulatedLedger {
    SimulatedLedger::new()
        .with_pool(1_000_000_000, 30_000_000_000, 0)
        .with_fixed_swap_output(1_000_000)
        .with_holder("A", 600, 10_000)
        .with_holder("B", 300, 10_000)
        .with_holder("C", 100, 10_000)
}

#[tokio::test(start_paused = true)]
async fn test_tick_during_run_is_dropped() {
    let f = fixture(distributing_ledger());
    f.ledger.set_swap_delay(Some(Duration::from_secs(5)));

    let (first, second) = tokio::join!(f.scheduler.tick(), async {
        tokio::time::sleep(Duration::from_millis(1)).await;
        f.scheduler.tick().await
    });

    assert!(matches!(first.unwrap(), TickOutcome::Ran(_)));
    assert!(matches!(second.unwrap(), TickOutcome::Busy));
    assert_eq!(f.ledger.swap_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_tick_in_settled_cycle_is_skipped() {
    let f = fixture(SimulatedLedger::new());

    let first = f.scheduler.tick().await.unwrap();
    let second = f.scheduler.tick().await.unwrap();

    assert!(matches!(first, TickOutcome::Ran(ref r) if r.state == CycleState::RolledOver));
    match second {
        TickOutcome::AlreadySettled { cycle, state } => {
            assert_eq!(cycle.seq, 6);
            assert_eq!(state, CycleState::RolledOver);
        }
        other => panic!("expected a skipped tick, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_after_max_runs() {
    let f = fixture(SimulatedLedger::new());
    let (_tx, rx) = watch::channel(false);

    let summary = f.scheduler.run(rx, Some(1)).await.unwrap();

    assert_eq!(
        summary,
        SchedulerSummary {
            ticks: 1,
            runs: 1,
            ..Default::default()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_run_ticks_on_interval_until_shutdown() {
    let f = fixture(SimulatedLedger::new());
    let (tx, rx) = watch::channel(false);

    // Ticks at 0s, 60s and 120s; the wall clock stays inside one cycle
    let (summary, _) = tokio::join!(f.scheduler.run(rx, None), async {
        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();
    });

    let summary = summary.unwrap();
    assert_eq!(summary.ticks, 3);
    assert_eq!(summary.runs, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.abandoned, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_abandons_run_and_leaves_cycle_pending() {
    let f = fixture(distributing_ledger());
    f.ledger.set_swap_delay(Some(Duration::from_secs(30)));
    let (tx, rx) = watch::channel(false);

    let (summary, _) = tokio::join!(f.scheduler.run(rx, None), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
    });

    let summary = summary.unwrap();
    assert_eq!(summary.abandoned, 1);
    assert_eq!(summary.runs, 0);
    let doc = f.store.load().unwrap();
    let cycle = f.scheduler.engine().current_cycle();
    assert_eq!(doc.cycles.state_of(cycle), CycleState::Pending);
    assert_eq!(doc.statistics.distribution_count, 0);
    assert_eq!(f.ledger.transfer_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_persistence_failure_stops_scheduler() {
    let f = fixture(SimulatedLedger::new());
    f.backend.fail_next_writes(1);
    let (_tx, rx) = watch::channel(false);

    let result = f.scheduler.run(rx, None).await;

    assert!(matches!(result, Err(PipelineError::Store(_))));
}

#[test]
fn test_second_instance_cannot_take_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.lock");

    let held = InstanceLock::acquire(&path).unwrap();
    let err = InstanceLock::acquire(&path).unwrap_err();
    assert!(matches!(err, LockError::AlreadyHeld { .. }));
    assert_eq!(InstanceLock::holder(&path), Some(held.info().clone()));

    drop(held);
    assert!(InstanceLock::holder(&path).is_none());
    assert!(InstanceLock::acquire(&path).is_ok());
}

#[test]
fn test_force_release_clears_stale_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.lock");
    let stale = InstanceLock::acquire(&path).unwrap();
    // Simulate a crash: the guard never runs its drop
    std::mem::forget(stale);

    assert!(InstanceLock::force_release(&path).unwrap());
    assert!(!InstanceLock::force_release(&path).unwrap());
    let fresh = InstanceLock::acquire(&path).unwrap();
    assert_eq!(fresh.path(), path.as_path());
}
