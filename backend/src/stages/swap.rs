//! Swap Stage
//!
//! Exchanges the harvested tokens for native currency through a
//! constant-product pool.
//!
//! # Critical Invariants
//!
//! 1. **Bounded slippage**: the swap is submitted with a minimum output
//!    derived from the pre-trade quote; trades that would move the pool too
//!    far are refused before submission
//! 2. **Measured proceeds**: proceeds are the balance change of the swap's
//!    own output account, never the payer's total balance, which may hold
//!    unrelated operating funds
//! 3. **No partial state**: any failure fails the stage; nothing is persisted
//!    by the stage itself

use crate::config::{DistributorConfig, BPS_DENOMINATOR};
use crate::ledger::{with_confirmation, LedgerClient, PoolState, SwapRequest, TxRef};
use crate::stages::{ledger_err, Stage, StageError};
use std::time::Duration;
use tracing::{debug, info};

/// Pre-trade quote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapQuote {
    pub amount_in: u64,
    /// Tokens reaching the pool after the token's transfer tax
    pub effective_in: u64,
    pub expected_out: u64,
    pub min_out: u64,
    pub price_impact_bps: u64,
}

/// Confirmed swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapReceipt {
    pub quote: SwapQuote,
    pub output_account: String,
    /// Measured native proceeds
    pub proceeds: u64,
    pub tx_ref: TxRef,
}

fn bps_of(amount: u128, bps: u64) -> u128 {
    amount * u128::from(bps) / u128::from(BPS_DENOMINATOR)
}

/// Native output of a constant-product swap of `amount_in` tokens
///
/// Applies the token's transfer tax, then the pool fee, then
/// `out = native_reserve * in / (token_reserve + in)`. `None` on overflow.
pub fn constant_product_out(pool: &PoolState, amount_in: u64) -> Option<u64> {
    let amount = u128::from(amount_in);
    let effective_in = amount.checked_sub(bps_of(amount, u64::from(pool.transfer_fee_bps)))?;
    let in_after_fee = effective_in.checked_sub(bps_of(effective_in, u64::from(pool.fee_bps)))?;
    let denominator = u128::from(pool.token_reserve).checked_add(in_after_fee)?;
    if denominator == 0 {
        return Some(0);
    }
    let out = u128::from(pool.native_reserve).checked_mul(in_after_fee)? / denominator;
    u64::try_from(out).ok()
}

/// Quote a swap and check it against liquidity and price-impact limits
pub fn quote(
    pool: &PoolState,
    amount_in: u64,
    max_slippage_bps: u16,
    max_price_impact_bps: u16,
) -> Result<SwapQuote, StageError> {
    let insufficient = || StageError::InsufficientLiquidity {
        amount_in,
        token_reserve: pool.token_reserve,
        native_reserve: pool.native_reserve,
    };
    let overflow = || StageError::ArithmeticOverflow {
        stage: Stage::Swap,
        what: "swap quote",
    };

    if pool.token_reserve == 0 || pool.native_reserve == 0 || amount_in == 0 {
        return Err(insufficient());
    }

    let amount = u128::from(amount_in);
    let effective_in = amount
        .checked_sub(bps_of(amount, u64::from(pool.transfer_fee_bps)))
        .ok_or_else(overflow)?;
    let expected_out = constant_product_out(pool, amount_in).ok_or_else(overflow)?;

    let impact_denominator = u128::from(pool.token_reserve) + effective_in;
    let price_impact_bps = u64::try_from(effective_in * u128::from(BPS_DENOMINATOR) / impact_denominator)
        .map_err(|_| overflow())?;
    if price_impact_bps > u64::from(max_price_impact_bps) {
        return Err(StageError::ExcessivePriceImpact {
            impact_bps: price_impact_bps,
            max_bps: max_price_impact_bps,
        });
    }

    let min_out = u64::try_from(
        u128::from(expected_out) * u128::from(BPS_DENOMINATOR.saturating_sub(u64::from(max_slippage_bps)))
            / u128::from(BPS_DENOMINATOR),
    )
    .map_err(|_| overflow())?;
    if min_out == 0 {
        return Err(insufficient());
    }

    Ok(SwapQuote {
        amount_in,
        effective_in: u64::try_from(effective_in).map_err(|_| overflow())?,
        expected_out,
        min_out,
        price_impact_bps,
    })
}

/// Swap stage settings
#[derive(Debug, Clone)]
pub struct SwapStage {
    operational_account: String,
    max_slippage_bps: u16,
    max_price_impact_bps: u16,
    confirmation_timeout: Duration,
}

impl SwapStage {
    pub fn new(
        operational_account: impl Into<String>,
        max_slippage_bps: u16,
        max_price_impact_bps: u16,
        confirmation_timeout: Duration,
    ) -> Self {
        assert!(
            u64::from(max_slippage_bps) < BPS_DENOMINATOR,
            "max_slippage_bps must be below 10000"
        );
        Self {
            operational_account: operational_account.into(),
            max_slippage_bps,
            max_price_impact_bps,
            confirmation_timeout,
        }
    }

    pub fn from_config(config: &DistributorConfig) -> Self {
        Self::new(
            config.operational_account.clone(),
            config.max_slippage_bps,
            config.max_price_impact_bps,
            config.confirmation_timeout(),
        )
    }

    /// Swap `amount_in` harvested tokens for native currency
    pub async fn run(&self, ledger: &dyn LedgerClient, amount_in: u64) -> Result<SwapReceipt, StageError> {
        let err = ledger_err(Stage::Swap);

        let pool = ledger.pool_state().await.map_err(&err)?;
        let quote = quote(&pool, amount_in, self.max_slippage_bps, self.max_price_impact_bps)?;
        debug!(
            amount_in,
            expected_out = quote.expected_out,
            min_out = quote.min_out,
            impact_bps = quote.price_impact_bps,
            "swap quoted"
        );

        // The output account must exist before the swap references it.
        let output_account = with_confirmation(
            "ensure_native_account",
            self.confirmation_timeout,
            ledger.ensure_native_account(&self.operational_account),
        )
        .await
        .map_err(&err)?;

        let before = ledger.native_balance(&output_account).await.map_err(&err)?;
        let request = SwapRequest {
            payer: self.operational_account.clone(),
            amount_in,
            min_amount_out: quote.min_out,
            destination: output_account.clone(),
        };
        let tx_ref = with_confirmation("swap", self.confirmation_timeout, ledger.swap_exact_in(&request))
            .await
            .map_err(&err)?;
        let after = ledger.native_balance(&output_account).await.map_err(&err)?;

        let proceeds = after.checked_sub(before).ok_or_else(|| StageError::BalanceRegressed {
            stage: Stage::Swap,
            account: output_account.clone(),
            before,
            after,
        })?;
        if proceeds < quote.min_out {
            return Err(StageError::ProceedsBelowMinimum {
                received: proceeds,
                min_out: quote.min_out,
            });
        }

        info!(amount_in, proceeds, tx = %tx_ref, "swap confirmed");
        Ok(SwapReceipt {
            quote,
            output_account,
            proceeds,
            tx_ref,
        })
    }
}
