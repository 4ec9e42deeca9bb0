//! State Store
//!
//! One versioned JSON document with a section per concern:
//!
//! - `cycles`: the Epoch/Cycle document, written by the cycle ledger
//! - `statistics`: cumulative counters and the last-distribution pointer
//! - `obligations`: payouts still owed
//! - `harvest`: harvested tokens a failed cycle left unswapped
//!
//! # Critical Invariants
//!
//! 1. **Read-merge-write**: [`StateStore::update`] re-reads the stored document
//!    before applying a writer's change, so sections and unknown fields
//!    written by someone else are carried through untouched
//! 2. **Compare-and-swap**: a commit only lands if the stored bytes are still
//!    the ones the change was computed from. Otherwise the change is
//!    re-applied to the newer document, so concurrent writers (in this
//!    process or another one) never overwrite each other
//! 3. **Durable commit**: an update is only reported successful after the
//!    backend flushed it; a failed write leaves the previous document
//! 4. **Monotonic version**: every committed write bumps `version` by one

pub mod backend;
pub mod cursor;
pub mod lock;

pub use backend::{FileBackend, MemoryBackend, StateBackend, StoreError};
pub use cursor::ConsumerCursor;
pub use lock::{InstanceLock, LockError, LockInfo};

use crate::models::carry::CarryOver;
use crate::models::cycle::CycleLedger;
use crate::models::obligation::ObligationBook;
use crate::models::stats::DistributionStatistics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The persisted aggregate
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub cycles: CycleLedger,
    #[serde(default)]
    pub statistics: DistributionStatistics,
    #[serde(default)]
    pub obligations: ObligationBook,
    #[serde(default)]
    pub harvest: CarryOver,
    /// Sections owned by other components
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Commit attempts before a write gives up on a busy document
pub const MAX_COMMIT_ATTEMPTS: u32 = 5;

fn parse(bytes: Option<&[u8]>) -> Result<StateDocument, StoreError> {
    match bytes {
        Some(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(bytes)?),
        _ => Ok(StateDocument::default()),
    }
}

/// Shared, merge-safe access to the state document
pub struct StateStore {
    backend: Box<dyn StateBackend>,
    write_guard: Mutex<()>,
}

impl StateStore {
    pub fn new(backend: impl StateBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            write_guard: Mutex::new(()),
        }
    }

    /// Read the latest committed document
    pub fn load(&self) -> Result<StateDocument, StoreError> {
        parse(self.backend.read()?.as_deref())
    }

    /// Apply an infallible change
    pub fn update<R>(&self, mut mutate: impl FnMut(&mut StateDocument) -> R) -> Result<R, StoreError> {
        self.try_update(|doc| Ok::<R, StoreError>(mutate(doc)))
    }

    /// Load, apply `mutate`, and durably write the result
    ///
    /// Nothing is written when `mutate` returns an error. If another writer
    /// committed in between, `mutate` runs again on the newer document, so
    /// it must only depend on the document it is given.
    pub fn try_update<R, E>(
        &self,
        mut mutate: impl FnMut(&mut StateDocument) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        let _guard = self.write_guard.lock().unwrap_or_else(|e| e.into_inner());

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let current = self.backend.read()?;
            let mut doc = parse(current.as_deref())?;
            let result = mutate(&mut doc)?;
            doc.version = doc.version.saturating_add(1);

            let bytes = serde_json::to_vec_pretty(&doc).map_err(StoreError::from)?;
            if self.backend.write_if_unchanged(current.as_deref(), &bytes)? {
                debug!(version = doc.version, bytes = bytes.len(), "state document committed");
                return Ok(result);
            }
            warn!(attempt, "state document changed underneath this write; re-applying");
        }
        Err(StoreError::Conflict {
            attempts: MAX_COMMIT_ATTEMPTS,
        }
        .into())
    }

    /// Operator resolution of an obligation paid (or verified) out of band
    ///
    /// Returns false when the id is unknown or already settled.
    pub fn resolve_obligation(&self, id: Uuid, tx_ref: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let resolved = self.update(|doc| doc.obligations.settle(id, tx_ref, at))?;
        if resolved {
            info!(obligation = %id, tx = tx_ref, "obligation resolved by operator");
        } else {
            warn!(obligation = %id, "no open obligation with this id");
        }
        Ok(resolved)
    }
}
