//! Read-only query surface for dashboards and notifiers.
//!
//! Every answer comes from the committed state document. In particular
//! "when did the last distribution happen" is answered from the snapshot's
//! own epoch/cycle, never from the cycle that is current when asked.

use crate::core::time::{Clock, CycleClock, CycleId, EpochId};
use crate::models::cycle::{CycleState, Epoch};
use crate::models::obligation::Obligation;
use crate::models::snapshot::DistributionSnapshot;
use crate::models::stats::DistributionStatistics;
use crate::orchestrator::fingerprint::FingerprintError;
use crate::store::{StateStore, StoreError};
use serde::Serialize;
use std::sync::Arc;

/// Per-state cycle counts of one epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochSummary {
    pub epoch_id: EpochId,
    pub cycles: usize,
    pub pending: usize,
    pub distributed: usize,
    pub rolled_over: usize,
    pub failed: usize,
}

impl EpochSummary {
    fn of(epoch_id: EpochId, epoch: &Epoch) -> Self {
        Self {
            epoch_id,
            cycles: epoch.cycles.len(),
            pending: epoch.count(CycleState::Pending),
            distributed: epoch.count(CycleState::Distributed),
            rolled_over: epoch.count(CycleState::RolledOver),
            failed: epoch.count(CycleState::Failed),
        }
    }
}

/// Everything a status page shows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub current: CycleId,
    pub current_state: CycleState,
    pub version: u64,
    pub statistics: DistributionStatistics,
    pub last_distribution: Option<DistributionSnapshot>,
    pub open_obligations: usize,
    pub open_obligation_amount: u64,
    pub fingerprint: String,
}

/// Read-only view over the state store
#[derive(Clone)]
pub struct DistributorView {
    store: Arc<StateStore>,
    clock: CycleClock,
    wall: Arc<dyn Clock>,
}

impl DistributorView {
    pub fn new(store: Arc<StateStore>, clock: CycleClock, wall: Arc<dyn Clock>) -> Self {
        Self { store, clock, wall }
    }

    /// Current (epoch, cycle), derived from the wall clock
    pub fn current(&self) -> CycleId {
        self.clock.locate(self.wall.now())
    }

    pub fn epoch(&self, id: EpochId) -> Result<Option<Epoch>, StoreError> {
        Ok(self.store.load()?.cycles.get_epoch(id).cloned())
    }

    /// Newest epochs first
    pub fn epochs(&self, limit: usize) -> Result<Vec<EpochSummary>, StoreError> {
        let doc = self.store.load()?;
        Ok(doc
            .cycles
            .list_epochs(limit)
            .into_iter()
            .map(|(id, epoch)| EpochSummary::of(id, epoch))
            .collect())
    }

    pub fn statistics(&self) -> Result<DistributionStatistics, StoreError> {
        Ok(self.store.load()?.statistics)
    }

    pub fn last_distribution(&self) -> Result<Option<DistributionSnapshot>, StoreError> {
        Ok(self.store.load()?.statistics.last_distribution)
    }

    /// Obligations not yet settled, oldest first
    pub fn outstanding_obligations(&self) -> Result<Vec<Obligation>, StoreError> {
        let doc = self.store.load()?;
        let mut open: Vec<Obligation> = doc.obligations.open().cloned().collect();
        open.sort_by_key(|o| o.created_at);
        Ok(open)
    }

    /// Content fingerprint of the distribution history
    pub fn fingerprint(&self) -> Result<String, StoreError> {
        fingerprint_of(&self.store.load()?.statistics)
    }

    pub fn status(&self) -> Result<StatusReport, StoreError> {
        let doc = self.store.load()?;
        let current = self.current();
        Ok(StatusReport {
            current,
            current_state: doc.cycles.state_of(current),
            version: doc.version,
            fingerprint: fingerprint_of(&doc.statistics)?,
            last_distribution: doc.statistics.last_distribution.clone(),
            open_obligations: doc.obligations.open().count(),
            open_obligation_amount: doc.obligations.open_amount(),
            statistics: doc.statistics,
        })
    }
}

fn fingerprint_of(stats: &DistributionStatistics) -> Result<String, StoreError> {
    stats.fingerprint().map_err(|e| match e {
        FingerprintError::Serialization(source) => StoreError::Serialization(source),
    })
}
