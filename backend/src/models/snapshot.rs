//! Distribution snapshot: the immutable record of one distributed cycle.

use crate::core::time::{CycleId, EpochId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one distributed cycle
///
/// The owning `epoch_id`/`cycle_seq` are fixed when the pipeline run begins
/// and are never recomputed from whatever cycle is current later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionSnapshot {
    pub epoch_id: EpochId,
    pub cycle_seq: u32,
    /// Tokens received by the operational account from the harvest
    pub harvest_amount: u64,
    /// Tokens sent into the pool
    pub swapped_amount: u64,
    /// Native currency measured on the swap output account
    pub native_proceeds: u64,
    pub holders_amount: u64,
    pub treasury_amount: u64,
    pub recipient_count: u32,
    /// Payouts that ended as obligations instead of confirmed transfers
    #[serde(default)]
    pub outstanding_count: u32,
    #[serde(default)]
    pub tx_refs: Vec<String>,
    pub distributed_at: DateTime<Utc>,
}

impl DistributionSnapshot {
    pub fn owner(&self) -> CycleId {
        CycleId::new(self.epoch_id, self.cycle_seq)
    }

    /// Native currency allocated by this distribution
    pub fn allocated(&self) -> u64 {
        self.holders_amount.saturating_add(self.treasury_amount)
    }
}
