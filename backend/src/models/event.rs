//! Cycle events for auditing a pipeline run.
//!
//! Every significant step of a cycle run is captured as an [`Event`]:
//! - **Harvest**: skipped below threshold, or consolidated
//! - **Swap**: executed with measured proceeds
//! - **Payout**: sent, or left as an obligation
//! - **Record**: the terminal state written for the cycle
//!
//! Events mirror what is logged through `tracing`, but as typed values the
//! caller can inspect.

use crate::core::time::CycleId;
use crate::models::cycle::CycleState;
use crate::models::obligation::{ObligationStatus, PayoutKind};
use crate::stages::Stage;
use uuid::Uuid;

/// Pipeline event capturing a state change.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Harvestable tax below the configured minimum
    HarvestSkipped {
        cycle: CycleId,
        harvestable: u64,
        threshold: u64,
    },

    /// Withheld tax consolidated into the operational account
    Harvested {
        cycle: CycleId,
        estimated: u64,
        received: u64,
        source_accounts: usize,
    },

    /// Tokens exchanged for native currency
    Swapped {
        cycle: CycleId,
        amount_in: u64,
        min_out: u64,
        proceeds: u64,
        output_account: String,
    },

    /// Payout confirmed
    PayoutSent {
        cycle: CycleId,
        kind: PayoutKind,
        recipient: String,
        amount: u64,
        attempts: u32,
        tx_ref: String,
    },

    /// Payout did not confirm within its retry budget
    PayoutDeferred {
        cycle: CycleId,
        kind: PayoutKind,
        recipient: String,
        amount: u64,
        attempts: u32,
        status: ObligationStatus,
        error: String,
    },

    /// Earlier obligation paid by this cycle
    ObligationSettled {
        cycle: CycleId,
        obligation_id: Uuid,
        owner: CycleId,
        amount: u64,
        tx_ref: String,
    },

    /// A stage failed
    StageFailed {
        cycle: CycleId,
        stage: Stage,
        reason: String,
    },

    /// Terminal state written for the cycle
    CycleRecorded { cycle: CycleId, state: CycleState },
}

impl Event {
    /// Cycle during whose run the event happened
    pub fn cycle(&self) -> CycleId {
        match self {
            Event::HarvestSkipped { cycle, .. }
            | Event::Harvested { cycle, .. }
            | Event::Swapped { cycle, .. }
            | Event::PayoutSent { cycle, .. }
            | Event::PayoutDeferred { cycle, .. }
            | Event::ObligationSettled { cycle, .. }
            | Event::StageFailed { cycle, .. }
            | Event::CycleRecorded { cycle, .. } => *cycle,
        }
    }

    /// Short type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::HarvestSkipped { .. } => "HarvestSkipped",
            Event::Harvested { .. } => "Harvested",
            Event::Swapped { .. } => "Swapped",
            Event::PayoutSent { .. } => "PayoutSent",
            Event::PayoutDeferred { .. } => "PayoutDeferred",
            Event::ObligationSettled { .. } => "ObligationSettled",
            Event::StageFailed { .. } => "StageFailed",
            Event::CycleRecorded { .. } => "CycleRecorded",
        }
    }
}

/// Ordered log of events from one or more runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn log(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) {
        self.events.extend(events);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Get events of a specific type
    pub fn events_of_type(&self, event_type: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Get events for a specific cycle
    pub fn events_for_cycle(&self, cycle: CycleId) -> Vec<&Event> {
        self.events.iter().filter(|e| e.cycle() == cycle).collect()
    }
}
