//! Payout obligations
//!
//! A payout that could not be confirmed within its retry budget is tracked
//! here until it settles. This is the `obligations` section of the state
//! document.
//!
//! - `Outstanding`: every attempt was definitively rejected; retried
//!   automatically by the next distributed cycle
//! - `Unconfirmed`: a confirmation timed out, so the transfer may have
//!   landed; never retried automatically, an operator resolves it
//! - `Settled`: paid, or resolved by an operator

use crate::core::time::{CycleId, EpochId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObligationStatus {
    Outstanding,
    Unconfirmed,
    Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutKind {
    Holder,
    Treasury,
}

/// An unpaid (or unverified) payout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Obligation {
    pub id: Uuid,
    pub kind: PayoutKind,
    pub recipient: String,
    pub amount: u64,
    /// Cycle whose distribution allocated this payout
    pub owner: CycleId,
    pub attempts: u32,
    pub last_error: String,
    pub status: ObligationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_tx: Option<String>,
}

impl Obligation {
    pub fn new(
        kind: PayoutKind,
        recipient: impl Into<String>,
        amount: u64,
        owner: CycleId,
        attempts: u32,
        last_error: impl Into<String>,
        status: ObligationStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            recipient: recipient.into(),
            amount,
            owner,
            attempts,
            last_error: last_error.into(),
            status,
            created_at,
            settled_at: None,
            settled_tx: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status != ObligationStatus::Settled
    }
}

/// A retry of an earlier obligation that went through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledObligation {
    pub id: Uuid,
    pub tx_ref: String,
    pub attempts: u32,
}

/// Persisted set of obligations
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObligationBook {
    #[serde(default)]
    pub entries: Vec<Obligation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ObligationBook {
    /// Obligations eligible for an automatic retry
    pub fn outstanding(&self) -> impl Iterator<Item = &Obligation> {
        self.entries
            .iter()
            .filter(|o| o.status == ObligationStatus::Outstanding)
    }

    /// Obligations still needing money or attention
    pub fn open(&self) -> impl Iterator<Item = &Obligation> {
        self.entries.iter().filter(|o| o.is_open())
    }

    pub fn push(&mut self, obligation: Obligation) {
        self.entries.push(obligation);
    }

    /// Bump the attempt count of an outstanding obligation after another
    /// failed round
    pub fn note_retry_failed(&mut self, id: Uuid, attempts: u32, error: &str, status: ObligationStatus) {
        if let Some(entry) = self.entries.iter_mut().find(|o| o.id == id) {
            entry.attempts = entry.attempts.saturating_add(attempts);
            entry.last_error = error.to_string();
            entry.status = status;
        }
    }

    /// Mark an obligation settled; returns false if unknown or already settled
    pub fn settle(&mut self, id: Uuid, tx_ref: &str, at: DateTime<Utc>) -> bool {
        match self.entries.iter_mut().find(|o| o.id == id && o.is_open()) {
            Some(entry) => {
                entry.status = ObligationStatus::Settled;
                entry.settled_at = Some(at);
                entry.settled_tx = Some(tx_ref.to_string());
                true
            }
            None => false,
        }
    }

    /// Total amount still owed
    pub fn open_amount(&self) -> u64 {
        self.open().fold(0u64, |acc, o| acc.saturating_add(o.amount))
    }

    /// Drop settled entries whose owning epoch has been pruned
    pub fn prune_settled(&mut self, oldest_kept: EpochId) {
        self.entries
            .retain(|o| o.is_open() || o.owner.epoch >= oldest_kept);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> CycleId {
        CycleId::new("2026-10-18".parse().unwrap(), 3)
    }

    #[test]
    fn test_settle_once() {
        let mut book = ObligationBook::default();
        let ob = Obligation::new(
            PayoutKind::Holder,
            "A",
            10,
            owner(),
            4,
            "rejected",
            ObligationStatus::Outstanding,
            Utc::now(),
        );
        let id = ob.id;
        book.push(ob);

        assert_eq!(book.open_amount(), 10);
        assert!(book.settle(id, "tx-1", Utc::now()));
        assert!(!book.settle(id, "tx-2", Utc::now()));
        assert_eq!(book.open_amount(), 0);
        assert_eq!(book.outstanding().count(), 0);
    }

    #[test]
    fn test_unconfirmed_not_retried() {
        let mut book = ObligationBook::default();
        book.push(Obligation::new(
            PayoutKind::Treasury,
            "T",
            5,
            owner(),
            1,
            "timeout",
            ObligationStatus::Unconfirmed,
            Utc::now(),
        ));

        assert_eq!(book.outstanding().count(), 0);
        assert_eq!(book.open().count(), 1);
    }
}
