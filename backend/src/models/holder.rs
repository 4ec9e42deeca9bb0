//! Holder eligibility
//!
//! A holder receives a share of the holder payout when its balance reaches
//! the configured minimum and its address is not on the exclusion list.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Token balance of one holder as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderBalance {
    pub address: String,
    pub balance: u64,
}

impl HolderBalance {
    pub fn new(address: impl Into<String>, balance: u64) -> Self {
        Self {
            address: address.into(),
            balance,
        }
    }
}

/// Holder with its derived eligibility flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderEligibility {
    pub address: String,
    pub balance: u64,
    pub eligible: bool,
}

/// Rules deciding which holders share in a payout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EligibilityRules {
    pub min_balance: u64,
    pub excluded: BTreeSet<String>,
}

impl EligibilityRules {
    pub fn new(min_balance: u64, excluded: impl IntoIterator<Item = String>) -> Self {
        Self {
            min_balance,
            excluded: excluded.into_iter().collect(),
        }
    }

    pub fn is_eligible(&self, holder: &HolderBalance) -> bool {
        holder.balance > 0
            && holder.balance >= self.min_balance
            && !self.excluded.contains(&holder.address)
    }

    /// Evaluate every holder, keeping ineligible ones for reporting
    pub fn evaluate(&self, holders: &[HolderBalance]) -> Vec<HolderEligibility> {
        holders
            .iter()
            .map(|h| HolderEligibility {
                address: h.address.clone(),
                balance: h.balance,
                eligible: self.is_eligible(h),
            })
            .collect()
    }
}
