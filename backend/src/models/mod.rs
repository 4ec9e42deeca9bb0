//! Domain models for the reward distributor

pub mod carry;
pub mod cycle;
pub mod event;
pub mod holder;
pub mod obligation;
pub mod snapshot;
pub mod stats;

// Re-exports
pub use carry::CarryOver;
pub use cycle::{Cycle, CycleLedger, CycleLedgerError, CycleResult, CycleState, Epoch, RecordOutcome};
pub use event::{Event, EventLog};
pub use holder::{EligibilityRules, HolderBalance, HolderEligibility};
pub use obligation::{Obligation, ObligationBook, ObligationStatus, PayoutKind, SettledObligation};
pub use snapshot::DistributionSnapshot;
pub use stats::DistributionStatistics;
