//! Reward Distributor Core
//!
//! Periodically harvests a token's withheld transfer tax, swaps it for native
//! currency through a liquidity pool, and splits the proceeds between token
//! holders and a treasury, one fixed-width cycle at a time.
//!
//! # Architecture
//!
//! - **core**: Cycle clock (epoch/cycle derivation from wall-clock time)
//! - **models**: Domain types (epoch/cycle ledger, statistics, holders, obligations)
//! - **config**: Distributor configuration and validation
//! - **ledger**: Ledger collaborator trait and the in-memory simulated ledger
//! - **stages**: Harvest, swap, split & payout
//! - **store**: Versioned state document, backends, instance lock, consumer cursor
//! - **orchestrator**: Cycle engine and scheduler
//! - **query**: Read-only dashboard surface
//!
//! # Critical Invariants
//!
//! 1. All amounts are u64 base units; intermediate math is done in u128
//! 2. A cycle gets at most one terminal record
//! 3. Epoch and cycle identity is a pure function of the UTC wall clock

// Module declarations
pub mod config;
pub mod core;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod query;
pub mod stages;
pub mod store;

// Re-exports for convenience
pub use config::{ConfigError, DistributorConfig};
pub use core::time::{Clock, CycleClock, CycleId, EpochId, ManualClock, SystemClock, SECONDS_PER_DAY};
pub use ledger::{LedgerClient, LedgerError, SimulatedLedger};
pub use models::{
    cycle::{CycleLedger, CycleResult, CycleState},
    event::{Event, EventLog},
    obligation::{Obligation, ObligationStatus},
    snapshot::DistributionSnapshot,
    stats::DistributionStatistics,
};
pub use orchestrator::{CycleEngine, CycleReport, CycleRun, PipelineError, Scheduler, TickOutcome};
pub use query::{DistributorView, StatusReport};
pub use stages::{Stage, StageError};
pub use store::{ConsumerCursor, FileBackend, InstanceLock, MemoryBackend, StateStore, StoreError};
