//! Carried-over harvest
//!
//! Tokens a cycle consolidated into the operational account but could not
//! swap. This is the `harvest` section of the state document. Only tokens
//! recorded here are ever added to a later swap; anything else sitting in
//! the operational account is not proceeds of a harvest.

use crate::core::time::CycleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarryOver {
    /// Harvested tokens awaiting a swap
    #[serde(default)]
    pub tokens: u64,
    /// First cycle that left tokens unswapped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<CycleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CarryOver {
    /// Record `tokens` as harvested but unswapped after `cycle`
    pub fn hold(&mut self, tokens: u64, cycle: CycleId, at: DateTime<Utc>) {
        if tokens == 0 {
            self.clear(at);
            return;
        }
        if self.tokens == 0 {
            self.since = Some(cycle);
        }
        self.tokens = tokens;
        self.updated_at = Some(at);
    }

    /// The carried tokens were swapped
    pub fn clear(&mut self, at: DateTime<Utc>) {
        self.tokens = 0;
        self.since = None;
        self.updated_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cycle(seq: u32) -> CycleId {
        CycleId::new("2026-10-18".parse().unwrap(), seq)
    }

    #[test]
    fn test_hold_keeps_first_cycle() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 6, 0, 0).unwrap();
        let mut carry = CarryOver::default();

        carry.hold(30_000, cycle(6), at);
        carry.hold(45_000, cycle(7), at);

        assert_eq!(carry.tokens, 45_000);
        assert_eq!(carry.since, Some(cycle(6)));

        carry.hold(0, cycle(8), at);
        assert_eq!(carry.tokens, 0);
        assert!(carry.since.is_none());
    }
}
