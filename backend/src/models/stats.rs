//! Distribution statistics
//!
//! Process-wide cumulative counters plus a pointer to the most recent
//! distribution. This is the `statistics` section of the state document.
//!
//! # Critical Invariants
//!
//! 1. Counters never decrease
//! 2. `last_distribution` carries its own owning epoch/cycle; consumers label
//!    events with it, never with the cycle that is current when they look
//! 3. A distribution is counted once, in the same write as its cycle record

use crate::models::snapshot::DistributionSnapshot;
use crate::orchestrator::fingerprint::{canonical_hash, FingerprintError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Cumulative counters and last-distribution pointer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionStatistics {
    #[serde(default)]
    pub total_harvested: u64,
    #[serde(default)]
    pub total_swapped: u64,
    #[serde(default)]
    pub total_native_proceeds: u64,
    #[serde(default)]
    pub total_to_holders: u64,
    #[serde(default)]
    pub total_to_treasury: u64,
    #[serde(default)]
    pub distribution_count: u64,
    #[serde(default)]
    pub rolled_over_count: u64,
    #[serde(default)]
    pub failed_count: u64,
    #[serde(default)]
    pub last_distribution: Option<DistributionSnapshot>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Content hashed into the change-detection fingerprint
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintContent<'a> {
    total_harvested: u64,
    total_swapped: u64,
    total_native_proceeds: u64,
    total_to_holders: u64,
    total_to_treasury: u64,
    distribution_count: u64,
    last_epoch_id: Option<String>,
    last_cycle_seq: Option<u32>,
    last_tx_refs: &'a [String],
}

impl DistributionStatistics {
    /// Fold one distribution into the counters and move the pointer
    pub fn apply_distribution(&mut self, snapshot: &DistributionSnapshot) {
        self.total_harvested = self.total_harvested.saturating_add(snapshot.harvest_amount);
        self.total_swapped = self.total_swapped.saturating_add(snapshot.swapped_amount);
        self.total_native_proceeds = self
            .total_native_proceeds
            .saturating_add(snapshot.native_proceeds);
        self.total_to_holders = self.total_to_holders.saturating_add(snapshot.holders_amount);
        self.total_to_treasury = self.total_to_treasury.saturating_add(snapshot.treasury_amount);
        self.distribution_count = self.distribution_count.saturating_add(1);
        self.updated_at = Some(snapshot.distributed_at);
        self.last_distribution = Some(snapshot.clone());
    }

    pub fn note_rolled_over(&mut self, at: DateTime<Utc>) {
        self.rolled_over_count = self.rolled_over_count.saturating_add(1);
        self.updated_at = Some(at);
    }

    pub fn note_failed(&mut self, at: DateTime<Utc>) {
        self.failed_count = self.failed_count.saturating_add(1);
        self.updated_at = Some(at);
    }

    /// Total native currency allocated to holders and treasury
    pub fn total_allocated(&self) -> u64 {
        self.total_to_holders.saturating_add(self.total_to_treasury)
    }

    /// Stable content-derived fingerprint of the distribution history
    ///
    /// Identical counters and last-distribution owner always hash to the same
    /// value, in any process, so a consumer can persist it and compare after
    /// its own restart. Roll-over and failure counters are left out: they
    /// are not distribution events.
    pub fn fingerprint(&self) -> Result<String, FingerprintError> {
        let last = self.last_distribution.as_ref();
        canonical_hash(&FingerprintContent {
            total_harvested: self.total_harvested,
            total_swapped: self.total_swapped,
            total_native_proceeds: self.total_native_proceeds,
            total_to_holders: self.total_to_holders,
            total_to_treasury: self.total_to_treasury,
            distribution_count: self.distribution_count,
            last_epoch_id: last.map(|s| s.epoch_id.to_string()),
            last_cycle_seq: last.map(|s| s.cycle_seq),
            last_tx_refs: last.map(|s| s.tx_refs.as_slice()).unwrap_or(&[]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::EpochId;
    use chrono::TimeZone;

    fn snapshot(seq: u32, holders: u64, treasury: u64) -> DistributionSnapshot {
        DistributionSnapshot {
            epoch_id: "2026-10-18".parse::<EpochId>().unwrap(),
            cycle_seq: seq,
            harvest_amount: 30_000,
            swapped_amount: 30_000,
            native_proceeds: holders + treasury,
            holders_amount: holders,
            treasury_amount: treasury,
            recipient_count: 3,
            outstanding_count: 0,
            tx_refs: vec![format!("tx-{seq}")],
            distributed_at: Utc.with_ymd_and_hms(2026, 10, 18, seq, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_apply_distribution_accumulates() {
        let mut stats = DistributionStatistics::default();
        stats.apply_distribution(&snapshot(1, 750_000, 250_000));
        stats.apply_distribution(&snapshot(2, 75, 25));

        assert_eq!(stats.distribution_count, 2);
        assert_eq!(stats.total_to_holders, 750_075);
        assert_eq!(stats.total_to_treasury, 250_025);
        assert_eq!(stats.last_distribution.as_ref().unwrap().cycle_seq, 2);
    }

    #[test]
    fn test_fingerprint_tracks_distributions_only() {
        let mut stats = DistributionStatistics::default();
        stats.apply_distribution(&snapshot(1, 750_000, 250_000));
        let before = stats.fingerprint().unwrap();

        stats.note_rolled_over(Utc::now());
        assert_eq!(stats.fingerprint().unwrap(), before);

        stats.apply_distribution(&snapshot(2, 10, 10));
        assert_ne!(stats.fingerprint().unwrap(), before);
    }

    #[test]
    fn test_fingerprint_ignores_unknown_fields() {
        let mut a = DistributionStatistics::default();
        a.apply_distribution(&snapshot(4, 1, 1));
        let mut b = a.clone();
        b.extra.insert("dashboardNote".into(), Value::from("hello"));

        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }
}
