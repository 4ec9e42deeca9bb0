//! Orchestrator - cycle pipeline and scheduling
//!
//! See `engine.rs` for the per-cycle pipeline and `scheduler.rs` for the
//! timer loop that drives it.

pub mod engine;
pub mod fingerprint;
pub mod scheduler;

// Re-export main types for convenience
pub use engine::{CycleEngine, CycleReport, CycleRun, PipelineError};
pub use fingerprint::{canonical_hash, FingerprintError};
pub use scheduler::{Scheduler, SchedulerSummary, TickOutcome};
