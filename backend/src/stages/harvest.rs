//! Tax Harvest Stage
//!
//! Sums the transfer tax withheld on holder accounts plus the pool-level
//! withheld amount, and consolidates it into the operational account when
//! the total reaches the configured minimum.
//!
//! The amount credited to the harvest is what the operational account
//! actually gained, re-queried after consolidation: the token's own transfer
//! tax may apply to the consolidation itself, so the estimate is not trusted.
//!
//! Only withheld tax is compared with the threshold. Tokens a failed cycle
//! left unswapped are passed in by the caller from the `harvest` section of
//! the state document; they ride along with the next harvest that clears
//! the threshold. The rest of the operational balance is never touched.

use crate::config::DistributorConfig;
use crate::ledger::{with_confirmation, LedgerClient, TxRef};
use crate::stages::{ledger_err, Stage, StageError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a harvest attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestOutcome {
    /// Economic no-op; the cycle rolls over
    BelowThreshold { harvestable: u64, threshold: u64 },
    Harvested(HarvestReceipt),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestReceipt {
    /// Pre-operation total of withheld tax
    pub estimated: u64,
    /// Measured increase of the operational token balance
    pub received: u64,
    /// Tokens from earlier cycles added to this swap
    pub carried_over: u64,
    pub source_accounts: usize,
    pub tx_refs: Vec<TxRef>,
}

impl HarvestReceipt {
    /// Tokens available to the swap
    pub fn available(&self) -> u64 {
        self.received.saturating_add(self.carried_over)
    }
}

/// Withheld tax visible before consolidation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Harvestable {
    /// Holder plus pool withheld tax
    pub total: u64,
    /// Holder accounts with a non-zero withheld amount
    pub sources: Vec<String>,
    pub pool_withheld: u64,
}

/// Harvest stage settings
#[derive(Debug, Clone)]
pub struct HarvestStage {
    min_harvest_amount: u64,
    batch_size: usize,
    operational_account: String,
    confirmation_timeout: Duration,
}

impl HarvestStage {
    pub fn new(
        min_harvest_amount: u64,
        batch_size: usize,
        operational_account: impl Into<String>,
        confirmation_timeout: Duration,
    ) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        Self {
            min_harvest_amount,
            batch_size,
            operational_account: operational_account.into(),
            confirmation_timeout,
        }
    }

    pub fn from_config(config: &DistributorConfig) -> Self {
        Self::new(
            config.min_harvest_amount,
            config.harvest_batch_size,
            config.operational_account.clone(),
            config.confirmation_timeout(),
        )
    }

    /// Total harvestable tax and the accounts holding it
    pub async fn harvestable(&self, ledger: &dyn LedgerClient) -> Result<Harvestable, StageError> {
        let err = ledger_err(Stage::Harvest);
        let balances = ledger.withheld_balances().await.map_err(&err)?;
        let pool = ledger.pool_withheld().await.map_err(&err)?;

        let mut total = pool;
        let mut sources = Vec::new();
        for entry in balances.into_iter().filter(|b| b.amount > 0) {
            total = total.checked_add(entry.amount).ok_or(StageError::ArithmeticOverflow {
                stage: Stage::Harvest,
                what: "harvestable total",
            })?;
            sources.push(entry.account);
        }
        Ok(Harvestable {
            total,
            sources,
            pool_withheld: pool,
        })
    }

    /// Gate on the threshold, then consolidate
    ///
    /// `carried` is the unswapped amount recorded by earlier cycles. It does
    /// not count toward the threshold.
    pub async fn run(&self, ledger: &dyn LedgerClient, carried: u64) -> Result<HarvestOutcome, StageError> {
        let found = self.harvestable(ledger).await?;
        let harvestable = found.total;

        if harvestable == 0 || harvestable < self.min_harvest_amount {
            debug!(
                harvestable,
                carried,
                threshold = self.min_harvest_amount,
                "harvest below threshold"
            );
            return Ok(HarvestOutcome::BelowThreshold {
                harvestable,
                threshold: self.min_harvest_amount,
            });
        }

        let err = ledger_err(Stage::Harvest);
        let ops = &self.operational_account;
        let before = ledger.token_balance(ops).await.map_err(&err)?;
        // A swap that timed out may have gone through after all
        let carried_over = carried.min(before);
        if carried_over < carried {
            warn!(
                recorded = carried,
                balance = before,
                "carried-over tokens exceed the operational balance; carrying what is there"
            );
        }

        let mut tx_refs = Vec::new();
        for batch in found.sources.chunks(self.batch_size) {
            let tx = with_confirmation(
                "consolidate_withheld",
                self.confirmation_timeout,
                ledger.consolidate_withheld(batch, ops),
            )
            .await
            .map_err(&err)?;
            debug!(accounts = batch.len(), tx = %tx, "withheld batch consolidated");
            tx_refs.push(tx);
        }
        if found.pool_withheld > 0 {
            let tx = with_confirmation(
                "consolidate_pool_withheld",
                self.confirmation_timeout,
                ledger.consolidate_pool_withheld(ops),
            )
            .await
            .map_err(&err)?;
            tx_refs.push(tx);
        }

        let after = ledger.token_balance(ops).await.map_err(&err)?;
        let received = after.checked_sub(before).ok_or_else(|| StageError::BalanceRegressed {
            stage: Stage::Harvest,
            account: ops.clone(),
            before,
            after,
        })?;
        let estimated = found.total;
        if received == 0 {
            return Err(StageError::NothingReceived { estimated });
        }

        info!(
            estimated,
            received,
            carried_over,
            sources = found.sources.len(),
            "harvest consolidated"
        );
        Ok(HarvestOutcome::Harvested(HarvestReceipt {
            estimated,
            received,
            carried_over,
            source_accounts: found.sources.len(),
            tx_refs,
        }))
    }
}
