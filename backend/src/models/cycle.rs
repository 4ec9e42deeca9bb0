//! Epoch/Cycle Ledger
//!
//! Durable record of calendar-day epochs and the fixed-width cycles inside
//! them. This is the `cycles` section of the persisted state document.
//!
//! # Critical Invariants
//!
//! 1. **Contiguous numbering**: an epoch's cycles are exactly `1..=N`, created
//!    all at once when the epoch is first observed
//! 2. **Single terminal write**: a cycle leaves PENDING at most once; a second
//!    write of the same state is a no-op, a different state is rejected
//! 3. **Bounded history**: epochs older than the retention window are pruned
//!    on write
//! 4. **One width per epoch**: an epoch keeps the cycle width it was created
//!    with; records made under a different width are rejected

use crate::core::time::{CycleClock, CycleId, EpochId, SECONDS_PER_DAY};
use crate::models::snapshot::DistributionSnapshot;
use crate::stages::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Lifecycle state of a single cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleState {
    /// Not yet executed (or abandoned mid-run)
    #[default]
    Pending,
    /// Harvest, swap and payout completed
    Distributed,
    /// Harvestable amount below the configured minimum
    RolledOver,
    /// A stage failed; retried by the next cycle
    Failed,
}

impl CycleState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CycleState::Pending)
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CycleState::Pending => "PENDING",
            CycleState::Distributed => "DISTRIBUTED",
            CycleState::RolledOver => "ROLLED_OVER",
            CycleState::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// Terminal result written for a cycle
///
/// A snapshot exists only for distributed cycles, so the type carries it
/// only there.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleResult {
    Distributed(DistributionSnapshot),
    RolledOver { harvestable: u64, threshold: u64 },
    Failed { stage: Stage, reason: String },
}

impl CycleResult {
    pub fn state(&self) -> CycleState {
        match self {
            CycleResult::Distributed(_) => CycleState::Distributed,
            CycleResult::RolledOver { .. } => CycleState::RolledOver,
            CycleResult::Failed { .. } => CycleState::Failed,
        }
    }
}

/// Errors raised by ledger writes
#[derive(Debug, Error, PartialEq)]
pub enum CycleLedgerError {
    #[error("Cycle {seq} out of range 1..={max}")]
    InvalidCycle { seq: u32, max: u32 },

    #[error("Cycle {cycle} already recorded as {existing}, refusing {attempted}")]
    TerminalConflict {
        cycle: CycleId,
        existing: CycleState,
        attempted: CycleState,
    },

    #[error("Epoch {epoch} was created with {stored_secs}s cycles, configured width is {configured_secs}s")]
    WidthMismatch {
        epoch: EpochId,
        stored_secs: u32,
        configured_secs: u32,
    },
}

/// Whether a record call changed anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    AlreadyRecorded,
}

/// One cycle row inside an epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    pub seq: u32,
    #[serde(default)]
    pub state: CycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<DistributionSnapshot>,
    /// Harvestable amount seen by a rolled-over cycle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harvestable: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cycle {
    pub fn pending(seq: u32) -> Self {
        Self {
            seq,
            state: CycleState::Pending,
            recorded_at: None,
            snapshot: None,
            harvestable: None,
            failed_stage: None,
            failure: None,
            extra: Map::new(),
        }
    }
}

/// One calendar-day epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Epoch {
    pub cycles: Vec<Cycle>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Epoch {
    fn new(cycles_per_epoch: u32, at: DateTime<Utc>) -> Self {
        Self {
            cycles: (1..=cycles_per_epoch).map(Cycle::pending).collect(),
            created_at: at,
            updated_at: at,
            extra: Map::new(),
        }
    }

    pub fn cycle(&self, seq: u32) -> Option<&Cycle> {
        self.cycles.iter().find(|c| c.seq == seq)
    }

    /// Count cycles in the given state
    pub fn count(&self, state: CycleState) -> usize {
        self.cycles.iter().filter(|c| c.state == state).count()
    }

    /// Width the epoch's cycles were created with
    pub fn cycle_width_secs(&self) -> Option<u32> {
        let count = u32::try_from(self.cycles.len()).ok().filter(|n| *n > 0)?;
        (SECONDS_PER_DAY % count == 0).then(|| SECONDS_PER_DAY / count)
    }
}

/// The Epoch/Cycle document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleLedger {
    #[serde(default)]
    pub epochs: BTreeMap<EpochId, Epoch>,
    #[serde(default)]
    pub current_epoch: Option<EpochId>,
    #[serde(default)]
    pub current_cycle_number: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CycleLedger {
    /// Register `at` as observed: creates its epoch if needed and moves the
    /// current pointers forward. Returns the cycle containing `at`.
    pub fn observe(&mut self, clock: &CycleClock, at: DateTime<Utc>) -> CycleId {
        let cycle = clock.locate(at);
        self.ensure_epoch(cycle.epoch, clock, at);

        let newer = match self.current_epoch {
            Some(epoch) => (cycle.epoch, cycle.seq) >= (epoch, self.current_cycle_number.unwrap_or(0)),
            None => true,
        };
        if newer {
            self.current_epoch = Some(cycle.epoch);
            self.current_cycle_number = Some(cycle.seq);
        }
        cycle
    }

    /// Create an epoch with all of its cycles PENDING, if absent
    pub fn ensure_epoch(&mut self, epoch: EpochId, clock: &CycleClock, at: DateTime<Utc>) -> &mut Epoch {
        self.epochs
            .entry(epoch)
            .or_insert_with(|| Epoch::new(clock.cycles_per_epoch(), at))
    }

    pub fn cycle(&self, id: CycleId) -> Option<&Cycle> {
        self.epochs.get(&id.epoch).and_then(|e| e.cycle(id.seq))
    }

    /// State of a cycle; unknown cycles are PENDING
    pub fn state_of(&self, id: CycleId) -> CycleState {
        self.cycle(id).map(|c| c.state).unwrap_or_default()
    }

    /// Stored width of `epoch` when it differs from `clock`'s
    pub fn width_conflict(&self, clock: &CycleClock, epoch: EpochId) -> Option<u32> {
        let existing = self.epochs.get(&epoch)?;
        let count = u32::try_from(existing.cycles.len()).unwrap_or(u32::MAX);
        if count == clock.cycles_per_epoch() {
            return None;
        }
        Some(existing.cycle_width_secs().unwrap_or(0))
    }

    /// Cycle width of the newest stored epoch
    pub fn latest_cycle_width(&self) -> Option<u32> {
        self.epochs.values().next_back().and_then(Epoch::cycle_width_secs)
    }

    /// Write a cycle's terminal result
    ///
    /// Writing the state a cycle already holds is a no-op, so a replayed
    /// write never duplicates history.
    pub fn record(
        &mut self,
        id: CycleId,
        result: CycleResult,
        clock: &CycleClock,
        at: DateTime<Utc>,
    ) -> Result<RecordOutcome, CycleLedgerError> {
        if !clock.is_valid_seq(id.seq) {
            return Err(CycleLedgerError::InvalidCycle {
                seq: id.seq,
                max: clock.cycles_per_epoch(),
            });
        }

        if let Some(stored_secs) = self.width_conflict(clock, id.epoch) {
            return Err(CycleLedgerError::WidthMismatch {
                epoch: id.epoch,
                stored_secs,
                configured_secs: clock.cycle_width_secs(),
            });
        }

        let attempted = result.state();
        let epoch = self.ensure_epoch(id.epoch, clock, at);
        let idx = epoch
            .cycles
            .iter()
            .position(|c| c.seq == id.seq)
            .ok_or(CycleLedgerError::InvalidCycle {
                seq: id.seq,
                max: clock.cycles_per_epoch(),
            })?;
        let cycle = &mut epoch.cycles[idx];

        if cycle.state.is_terminal() {
            if cycle.state == attempted {
                return Ok(RecordOutcome::AlreadyRecorded);
            }
            return Err(CycleLedgerError::TerminalConflict {
                cycle: id,
                existing: cycle.state,
                attempted,
            });
        }

        cycle.state = attempted;
        cycle.recorded_at = Some(at);
        match result {
            CycleResult::Distributed(snapshot) => cycle.snapshot = Some(snapshot),
            CycleResult::RolledOver { harvestable, .. } => cycle.harvestable = Some(harvestable),
            CycleResult::Failed { stage, reason } => {
                cycle.failed_stage = Some(stage);
                cycle.failure = Some(reason);
            }
        }
        epoch.updated_at = at;
        Ok(RecordOutcome::Recorded)
    }

    /// Drop epochs older than `retention_days` before `today`
    pub fn prune(&mut self, today: EpochId, retention_days: u32) -> Vec<EpochId> {
        let cutoff = today.days_before(retention_days);
        let stale: Vec<EpochId> = self.epochs.range(..cutoff).map(|(id, _)| *id).collect();
        for id in &stale {
            self.epochs.remove(id);
        }
        stale
    }

    /// Newest epochs first
    pub fn list_epochs(&self, limit: usize) -> Vec<(EpochId, &Epoch)> {
        self.epochs
            .iter()
            .rev()
            .take(limit)
            .map(|(id, epoch)| (*id, epoch))
            .collect()
    }

    pub fn get_epoch(&self, id: EpochId) -> Option<&Epoch> {
        self.epochs.get(&id)
    }
}
