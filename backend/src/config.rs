//! Distributor configuration
//!
//! Loaded from a JSON file. Every field has a default except the two
//! accounts, which must be named explicitly. Call [`DistributorConfig::validate`]
//! before handing the config to the engine.
//!
//! # Example
//!
//! ```
//! use reward_distributor_core::DistributorConfig;
//!
//! let config = DistributorConfig::from_json_str(r#"{
//!     "operational_account": "OPS",
//!     "treasury_account": "TREASURY",
//!     "min_harvest_amount": 20000
//! }"#).unwrap();
//!
//! assert_eq!(config.cycle_width_secs, 3_600);
//! assert_eq!(config.holders_share_bps, 7_500);
//! ```

use crate::core::time::{CycleClock, SECONDS_PER_DAY};
use crate::models::holder::EligibilityRules;
use crate::orchestrator::fingerprint::{canonical_hash, FingerprintError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Basis-point denominator
pub const BPS_DENOMINATOR: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Complete distributor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributorConfig {
    /// Width of one cycle; must divide 86,400
    #[serde(default = "default_cycle_width_secs")]
    pub cycle_width_secs: u32,

    /// How often the scheduler wakes up to look at the current cycle
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Minimum harvestable tax (token units) worth a distribution
    #[serde(default)]
    pub min_harvest_amount: u64,

    /// Holder share of swap proceeds; the treasury receives the rest
    #[serde(default = "default_holders_share_bps")]
    pub holders_share_bps: u16,

    /// Retries per payout after the first attempt
    #[serde(default = "default_max_payout_retries")]
    pub max_payout_retries: u32,

    #[serde(default = "default_payout_retry_delay_ms")]
    pub payout_retry_delay_ms: u64,

    /// Days of epoch history kept in the state document
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Accepted shortfall from the quoted swap output
    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: u16,

    /// Largest share of the pool's token reserve a single swap may take
    #[serde(default = "default_max_price_impact_bps")]
    pub max_price_impact_bps: u16,

    /// Upper bound on any single confirmation wait
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,

    /// Source accounts consolidated per harvest operation
    #[serde(default = "default_harvest_batch_size")]
    pub harvest_batch_size: usize,

    /// Minimum token balance for a holder to share in payouts
    #[serde(default)]
    pub min_holder_balance: u64,

    /// Addresses never paid as holders (pools, team wallets, ...)
    #[serde(default)]
    pub excluded_addresses: Vec<String>,

    /// Account that receives harvested tax and pays out proceeds
    pub operational_account: String,

    pub treasury_account: String,
}

fn default_cycle_width_secs() -> u32 {
    3_600
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_holders_share_bps() -> u16 {
    7_500
}

fn default_max_payout_retries() -> u32 {
    3
}

fn default_payout_retry_delay_ms() -> u64 {
    2_000
}

fn default_retention_days() -> u32 {
    7
}

fn default_max_slippage_bps() -> u16 {
    100
}

fn default_max_price_impact_bps() -> u16 {
    500
}

fn default_confirmation_timeout_secs() -> u64 {
    60
}

fn default_harvest_batch_size() -> usize {
    20
}

impl DistributorConfig {
    /// Config with defaults for everything but the accounts
    pub fn new(operational_account: impl Into<String>, treasury_account: impl Into<String>) -> Self {
        Self {
            cycle_width_secs: default_cycle_width_secs(),
            tick_interval_secs: default_tick_interval_secs(),
            min_harvest_amount: 0,
            holders_share_bps: default_holders_share_bps(),
            max_payout_retries: default_max_payout_retries(),
            payout_retry_delay_ms: default_payout_retry_delay_ms(),
            retention_days: default_retention_days(),
            max_slippage_bps: default_max_slippage_bps(),
            max_price_impact_bps: default_max_price_impact_bps(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            harvest_batch_size: default_harvest_batch_size(),
            min_holder_balance: 0,
            excluded_addresses: Vec::new(),
            operational_account: operational_account.into(),
            treasury_account: treasury_account.into(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load and validate a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field against its allowed range
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.cycle_width_secs == 0 || SECONDS_PER_DAY % self.cycle_width_secs != 0 {
            return invalid(format!(
                "cycle_width_secs {} must be positive and divide {}",
                self.cycle_width_secs, SECONDS_PER_DAY
            ));
        }
        if self.tick_interval_secs == 0 {
            return invalid("tick_interval_secs must be positive".to_string());
        }
        if self.tick_interval_secs > u64::from(self.cycle_width_secs) {
            return invalid(format!(
                "tick_interval_secs {} exceeds cycle_width_secs {}; cycles would be skipped",
                self.tick_interval_secs, self.cycle_width_secs
            ));
        }
        if u64::from(self.holders_share_bps) > BPS_DENOMINATOR {
            return invalid(format!(
                "holders_share_bps {} exceeds {}",
                self.holders_share_bps, BPS_DENOMINATOR
            ));
        }
        if u64::from(self.max_slippage_bps) >= BPS_DENOMINATOR {
            return invalid("max_slippage_bps must be below 10000".to_string());
        }
        if self.max_price_impact_bps == 0 || u64::from(self.max_price_impact_bps) > BPS_DENOMINATOR {
            return invalid("max_price_impact_bps must be in 1..=10000".to_string());
        }
        if self.confirmation_timeout_secs == 0 {
            return invalid("confirmation_timeout_secs must be positive".to_string());
        }
        if self.harvest_batch_size == 0 {
            return invalid("harvest_batch_size must be positive".to_string());
        }
        if self.retention_days == 0 {
            return invalid("retention_days must be positive".to_string());
        }
        if self.operational_account.is_empty() || self.treasury_account.is_empty() {
            return invalid("operational_account and treasury_account are required".to_string());
        }
        if self.operational_account == self.treasury_account {
            return invalid("operational_account and treasury_account must differ".to_string());
        }
        Ok(())
    }

    pub fn cycle_clock(&self) -> CycleClock {
        CycleClock::new(self.cycle_width_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn payout_retry_delay(&self) -> Duration {
        Duration::from_millis(self.payout_retry_delay_ms)
    }

    /// Holder eligibility rules; the distributor's own accounts are always
    /// excluded
    pub fn eligibility_rules(&self) -> EligibilityRules {
        let excluded = self
            .excluded_addresses
            .iter()
            .cloned()
            .chain([self.operational_account.clone(), self.treasury_account.clone()]);
        EligibilityRules::new(self.min_holder_balance, excluded)
    }

    /// SHA-256 of the canonical JSON form
    pub fn config_hash(&self) -> Result<String, FingerprintError> {
        canonical_hash(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(DistributorConfig::new("OPS", "TREASURY").validate().is_ok());
    }

    #[test]
    fn test_rejects_ragged_cycle_width() {
        let mut config = DistributorConfig::new("OPS", "TREASURY");
        config.cycle_width_secs = 7_000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_share_above_100_percent() {
        let mut config = DistributorConfig::new("OPS", "TREASURY");
        config.holders_share_bps = 10_001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_accounts_fail_to_parse() {
        assert!(matches!(
            DistributorConfig::from_json_str("{}"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_accounts_always_excluded() {
        let rules = DistributorConfig::new("OPS", "TREASURY").eligibility_rules();
        assert!(rules.excluded.contains("OPS"));
        assert!(rules.excluded.contains("TREASURY"));
    }

    #[test]
    fn test_config_hash_changes_with_content() {
        let a = DistributorConfig::new("OPS", "TREASURY");
        let mut b = a.clone();
        b.min_harvest_amount = 1;
        assert_ne!(a.config_hash().unwrap(), b.config_hash().unwrap());
        assert_eq!(a.config_hash().unwrap(), a.clone().config_hash().unwrap());
    }
}
