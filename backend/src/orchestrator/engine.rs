//! Cycle Engine
//!
//! Runs one cycle's pipeline and commits its single terminal record:
//!
//! ```text
//! For cycle (epoch, seq):
//! 1. Skip if the stored cycle is already terminal
//! 2. Harvest (below threshold → ROLLED_OVER)
//! 3. Snapshot holder eligibility
//! 4. Swap (measured proceeds)
//! 5. Split & payout (retries earlier outstanding obligations first)
//! 6. Commit: cycle record + statistics + obligations + carry-over in one
//!    durable write
//! ```
//!
//! Harvested tokens the cycle could not swap are recorded in the `harvest`
//! section and added to the next swap. Nothing else in the operational
//! account is ever swapped.
//!
//! # Critical Invariants
//!
//! 1. **One terminal record**: the commit goes through the cycle ledger,
//!    which refuses a second, different terminal state
//! 2. **Owner fixed at start**: the snapshot's epoch/cycle is the cycle passed
//!    to [`CycleEngine::run_cycle`], never re-derived from the clock at
//!    commit time
//! 3. **No success without durability**: a failed commit is returned as
//!    [`PipelineError::Store`]; the run is not reported as completed
//! 4. **Stage failures are data**: a [`StageError`] becomes a FAILED record,
//!    never an `Err` from the engine
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = CycleEngine::new(config, ledger, store, Arc::new(SystemClock))?;
//!
//! match engine.run_current().await? {
//!     CycleRun::Completed(report) => println!("{} → {}", report.cycle, report.state),
//!     CycleRun::AlreadySettled { cycle, state } => println!("{cycle} already {state}"),
//! }
//! ```

use crate::config::{ConfigError, DistributorConfig};
use crate::core::time::{Clock, CycleClock, CycleId, EpochId};
use crate::ledger::LedgerClient;
use crate::models::cycle::{CycleLedgerError, CycleResult, CycleState, RecordOutcome};
use crate::models::event::Event;
use crate::models::obligation::Obligation;
use crate::models::snapshot::DistributionSnapshot;
use crate::stages::payout::{PayoutInput, PayoutReport};
use crate::stages::{HarvestOutcome, HarvestStage, PayoutStage, StageError, SwapStage};
use crate::store::{StateDocument, StateStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

// ============================================================================
// Result Types
// ============================================================================

/// Errors that stop the pipeline itself (as opposed to failing a cycle)
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("State persistence failed: {0}")]
    Store(#[from] StoreError),

    #[error("Cycle record rejected: {0}")]
    Record(#[from] CycleLedgerError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// What a completed run wrote
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: CycleId,
    pub state: CycleState,
    /// Present only for DISTRIBUTED cycles
    pub snapshot: Option<DistributionSnapshot>,
    /// Present only for FAILED cycles
    pub failure: Option<StageError>,
    pub events: Vec<Event>,
}

/// Result of asking the engine to run a cycle
#[derive(Debug, Clone)]
pub enum CycleRun {
    /// The cycle already held a terminal record; nothing was invoked
    AlreadySettled { cycle: CycleId, state: CycleState },
    Completed(CycleReport),
}

/// Stage outcome before it is committed
enum PipelineOutcome {
    RolledOver { harvestable: u64, threshold: u64 },
    Distributed {
        snapshot: DistributionSnapshot,
        payout: PayoutReport,
    },
}

// ============================================================================
// Engine
// ============================================================================

/// Executes and commits cycles against one ledger and one state store
pub struct CycleEngine {
    config: DistributorConfig,
    clock: CycleClock,
    ledger: Arc<dyn LedgerClient>,
    store: Arc<StateStore>,
    wall: Arc<dyn Clock>,
    harvest: HarvestStage,
    swap: SwapStage,
    payout: PayoutStage,
}

impl CycleEngine {
    /// Validate `config` and build the stages from it
    pub fn new(
        config: DistributorConfig,
        ledger: Arc<dyn LedgerClient>,
        store: Arc<StateStore>,
        wall: Arc<dyn Clock>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let clock = config.cycle_clock();

        // Today's epoch must have been created with this width, or its
        // cycles cannot be recorded
        let today = clock.locate(wall.now()).epoch;
        if let Some(stored_secs) = store.load()?.cycles.width_conflict(&clock, today) {
            return Err(ConfigError::Invalid(format!(
                "cycle_width_secs is {} but epoch {today} was started with {stored_secs}s cycles; \
                 keep the stored width until the next epoch",
                clock.cycle_width_secs()
            ))
            .into());
        }

        Ok(Self {
            clock,
            harvest: HarvestStage::from_config(&config),
            swap: SwapStage::from_config(&config),
            payout: PayoutStage::from_config(&config),
            config,
            ledger,
            store,
            wall,
        })
    }

    pub fn config(&self) -> &DistributorConfig {
        &self.config
    }

    pub fn cycle_clock(&self) -> &CycleClock {
        &self.clock
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn wall(&self) -> &Arc<dyn Clock> {
        &self.wall
    }

    /// Current (epoch, cycle); a pure function of the wall clock
    pub fn current_cycle(&self) -> CycleId {
        self.clock.locate(self.wall.now())
    }

    /// Derive the current cycle and make sure its epoch exists in the store
    pub fn observe_current(&self) -> Result<CycleId, PipelineError> {
        let now = self.wall.now();
        let cycle = self.store.update(|doc| doc.cycles.observe(&self.clock, now))?;
        Ok(cycle)
    }

    /// Run the cycle containing the current wall-clock time
    pub async fn run_current(&self) -> Result<CycleRun, PipelineError> {
        let cycle = self.observe_current()?;
        self.run_cycle(cycle).await
    }

    /// Run `cycle` unless it already holds a terminal record
    pub async fn run_cycle(&self, cycle: CycleId) -> Result<CycleRun, PipelineError> {
        let doc = self.store.load()?;
        let state = doc.cycles.state_of(cycle);
        if state.is_terminal() {
            info!(%cycle, %state, "cycle already settled; skipping");
            return Ok(CycleRun::AlreadySettled { cycle, state });
        }

        let obligations: Vec<Obligation> = doc.obligations.outstanding().cloned().collect();
        let mut events = Vec::new();
        let mut unswapped = None;

        let run = self
            .execute(cycle, &obligations, doc.harvest.tokens, &mut unswapped, &mut events)
            .await;
        let (result, failure, payout) = match run {
            Ok(PipelineOutcome::RolledOver { harvestable, threshold }) => {
                (CycleResult::RolledOver { harvestable, threshold }, None, None)
            }
            Ok(PipelineOutcome::Distributed { snapshot, payout }) => {
                (CycleResult::Distributed(snapshot), None, Some(payout))
            }
            Err(e) => {
                let stage = e.stage();
                events.push(Event::StageFailed {
                    cycle,
                    stage,
                    reason: e.to_string(),
                });
                (
                    CycleResult::Failed {
                        stage,
                        reason: e.to_string(),
                    },
                    Some(e),
                    None,
                )
            }
        };

        let state = result.state();
        let snapshot = match &result {
            CycleResult::Distributed(snapshot) => Some(snapshot.clone()),
            _ => None,
        };

        if let Err(e) = self.commit(cycle, result, payout.as_ref(), unswapped) {
            error!(%cycle, %state, error = %e, "cycle commit failed; result not recorded");
            return Err(e);
        }

        match (&state, &failure) {
            (CycleState::Failed, Some(e)) => {
                error!(%cycle, stage = %e.stage(), error = %e, "cycle FAILED")
            }
            (CycleState::Distributed, _) => {
                let (holders, treasury) = snapshot
                    .as_ref()
                    .map(|s| (s.holders_amount, s.treasury_amount))
                    .unwrap_or_default();
                info!(%cycle, holders, treasury, "cycle DISTRIBUTED")
            }
            _ => info!(%cycle, %state, "cycle recorded"),
        }
        events.push(Event::CycleRecorded { cycle, state });

        Ok(CycleRun::Completed(CycleReport {
            cycle,
            state,
            snapshot,
            failure,
            events,
        }))
    }

    /// Harvest → eligibility snapshot → swap → payout
    ///
    /// `unswapped` is set once the harvest consolidated: to the tokens in
    /// hand, then to zero when the swap consumed them.
    async fn execute(
        &self,
        cycle: CycleId,
        obligations: &[Obligation],
        carried: u64,
        unswapped: &mut Option<u64>,
        events: &mut Vec<Event>,
    ) -> Result<PipelineOutcome, StageError> {
        let ledger = self.ledger.as_ref();

        // STEP 1: HARVEST
        let harvest = match self.harvest.run(ledger, carried).await? {
            HarvestOutcome::BelowThreshold { harvestable, threshold } => {
                events.push(Event::HarvestSkipped {
                    cycle,
                    harvestable,
                    threshold,
                });
                return Ok(PipelineOutcome::RolledOver { harvestable, threshold });
            }
            HarvestOutcome::Harvested(receipt) => receipt,
        };
        *unswapped = Some(harvest.available());
        events.push(Event::Harvested {
            cycle,
            estimated: harvest.estimated,
            received: harvest.received,
            source_accounts: harvest.source_accounts,
        });

        // STEP 2: ELIGIBILITY
        // Taken before the swap so nothing after it can fail the cycle
        // except the swap itself.
        let holders = self.payout.eligible_holders(ledger).await?;

        // STEP 3: SWAP
        let swap = self.swap.run(ledger, harvest.available()).await?;
        *unswapped = Some(0);
        events.push(Event::Swapped {
            cycle,
            amount_in: swap.quote.amount_in,
            min_out: swap.quote.min_out,
            proceeds: swap.proceeds,
            output_account: swap.output_account.clone(),
        });

        // STEP 4: SPLIT & PAYOUT
        let payout = self
            .payout
            .run(
                ledger,
                PayoutInput {
                    cycle,
                    source_account: &swap.output_account,
                    proceeds: swap.proceeds,
                    holders: &holders,
                    obligations,
                    now: self.wall.now(),
                },
            )
            .await;
        events.extend(payout.events.iter().cloned());

        let mut tx_refs = harvest.tx_refs;
        tx_refs.push(swap.tx_ref);
        tx_refs.extend(payout.tx_refs());

        let snapshot = DistributionSnapshot {
            epoch_id: cycle.epoch,
            cycle_seq: cycle.seq,
            harvest_amount: harvest.received,
            swapped_amount: swap.quote.amount_in,
            native_proceeds: swap.proceeds,
            holders_amount: payout.holders_amount,
            treasury_amount: payout.treasury_amount,
            recipient_count: payout.recipient_count(),
            outstanding_count: payout.outstanding_count(),
            tx_refs,
            distributed_at: self.wall.now(),
        };
        Ok(PipelineOutcome::Distributed { snapshot, payout })
    }

    /// Write the terminal record with its statistics, obligations and
    /// carry-over
    fn commit(
        &self,
        cycle: CycleId,
        result: CycleResult,
        payout: Option<&PayoutReport>,
        unswapped: Option<u64>,
    ) -> Result<(), PipelineError> {
        let now = self.wall.now();
        self.store.try_update(|doc| -> Result<(), PipelineError> {
            doc.cycles.observe(&self.clock, now);

            let snapshot = match &result {
                CycleResult::Distributed(snapshot) => Some(snapshot.clone()),
                _ => None,
            };
            let state = result.state();
            let outcome = doc.cycles.record(cycle, result.clone(), &self.clock, now)?;

            if outcome == RecordOutcome::Recorded {
                match (state, snapshot) {
                    (CycleState::Distributed, Some(snapshot)) => doc.statistics.apply_distribution(&snapshot),
                    (CycleState::RolledOver, _) => doc.statistics.note_rolled_over(now),
                    (CycleState::Failed, _) => doc.statistics.note_failed(now),
                    _ => {}
                }
                if let Some(payout) = payout {
                    apply_obligations(doc, payout, now);
                }
                if let Some(tokens) = unswapped {
                    doc.harvest.hold(tokens, cycle, now);
                }
            } else {
                warn!(%cycle, %state, "cycle was already recorded; statistics left unchanged");
            }

            self.prune(doc, now);
            Ok(())
        })
    }

    fn prune(&self, doc: &mut StateDocument, now: DateTime<Utc>) {
        let today = EpochId::containing(now);
        let pruned = doc.cycles.prune(today, self.config.retention_days);
        if !pruned.is_empty() {
            info!(epochs = pruned.len(), oldest_kept = %today.days_before(self.config.retention_days), "pruned epochs");
        }
        doc.obligations
            .prune_settled(today.days_before(self.config.retention_days));
    }
}

fn apply_obligations(doc: &mut StateDocument, payout: &PayoutReport, now: DateTime<Utc>) {
    for settled in &payout.settled {
        doc.obligations.settle(settled.id, &settled.tx_ref, now);
    }
    for failed in &payout.retry_failures {
        doc.obligations
            .note_retry_failed(failed.id, failed.attempts, &failed.error, failed.status);
    }
    for obligation in &payout.new_obligations {
        doc.obligations.push(obligation.clone());
    }
}
