//! Cycle Scheduler
//!
//! Fires at a fixed interval and hands the current cycle to the
//! [`CycleEngine`].
//!
//! # Critical Invariants
//!
//! 1. **Single instance**: a scheduler cannot be built without holding the
//!    [`InstanceLock`] for its state
//! 2. **No overlap**: at most one pipeline run is in flight; a tick that finds
//!    one running is dropped, not queued, and late interval ticks are skipped
//! 3. **Clean abandonment**: on shutdown an in-flight run is dropped before it
//!    commits, so its cycle stays PENDING and is re-evaluated on next start

use crate::core::time::CycleId;
use crate::models::cycle::CycleState;
use crate::orchestrator::engine::{CycleEngine, CycleReport, CycleRun, PipelineError};
use crate::store::InstanceLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What one tick did
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// The pipeline ran and recorded a terminal state
    Ran(CycleReport),
    /// The current cycle already had a terminal record
    AlreadySettled { cycle: CycleId, state: CycleState },
    /// Another run was in flight; this tick was dropped
    Busy,
}

/// Counters for a [`Scheduler::run`] session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub ticks: usize,
    pub runs: usize,
    pub skipped: usize,
    pub busy: usize,
    /// Runs dropped by shutdown before committing
    pub abandoned: usize,
}

pub struct Scheduler {
    engine: Arc<CycleEngine>,
    tick_interval: Duration,
    in_flight: Mutex<()>,
    lock: InstanceLock,
}

impl Scheduler {
    pub fn new(engine: Arc<CycleEngine>, lock: InstanceLock) -> Self {
        let tick_interval = engine.config().tick_interval();
        Self {
            engine,
            tick_interval,
            in_flight: Mutex::new(()),
            lock,
        }
    }

    pub fn engine(&self) -> &Arc<CycleEngine> {
        &self.engine
    }

    pub fn lock(&self) -> &InstanceLock {
        &self.lock
    }

    /// One scheduling decision for the current cycle
    pub async fn tick(&self) -> Result<TickOutcome, PipelineError> {
        let Ok(_running) = self.in_flight.try_lock() else {
            debug!("pipeline run in flight; dropping tick");
            return Ok(TickOutcome::Busy);
        };

        match self.engine.run_current().await? {
            CycleRun::Completed(report) => Ok(TickOutcome::Ran(report)),
            CycleRun::AlreadySettled { cycle, state } => Ok(TickOutcome::AlreadySettled { cycle, state }),
        }
    }

    /// Tick until shutdown is signalled or `max_runs` pipeline runs complete
    ///
    /// A persistence failure stops the loop and is returned: the scheduler
    /// must not keep advancing without a durable record.
    pub async fn run(
        &self,
        mut shutdown: watch::Receiver<bool>,
        max_runs: Option<usize>,
    ) -> Result<SchedulerSummary, PipelineError> {
        let mut summary = SchedulerSummary::default();
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            instance = %self.lock.info().instance_id,
            interval_secs = self.tick_interval.as_secs(),
            "scheduler started"
        );

        loop {
            if *shutdown.borrow() || max_runs.is_some_and(|max| summary.runs >= max) {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = interval.tick() => {}
            }

            summary.ticks += 1;
            let outcome = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => {
                    warn!("shutdown during pipeline run; abandoning cycle without a terminal record");
                    summary.abandoned += 1;
                    break;
                }
                outcome = self.tick() => outcome?,
            };

            match outcome {
                TickOutcome::Ran(_) => summary.runs += 1,
                TickOutcome::AlreadySettled { .. } => summary.skipped += 1,
                TickOutcome::Busy => summary.busy += 1,
            }
        }

        info!(
            ticks = summary.ticks,
            runs = summary.runs,
            skipped = summary.skipped,
            abandoned = summary.abandoned,
            "scheduler stopped"
        );
        Ok(summary)
    }
}

/// Resolves once shutdown is requested or the sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
