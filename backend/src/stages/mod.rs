//! Pipeline stages
//!
//! Harvest → Swap → Split & Payout, run strictly in sequence: each stage
//! consumes the previous stage's confirmed output.
//!
//! - [`harvest`]: threshold gate and tax consolidation
//! - [`swap`]: pool quote, slippage bounds, measured proceeds
//! - [`payout`]: ratio split, pro-rata allocation, per-recipient retry

pub mod harvest;
pub mod payout;
pub mod swap;

pub use harvest::{HarvestOutcome, HarvestReceipt, HarvestStage, Harvestable};
pub use payout::{Allocation, PayoutReport, PayoutResult, PayoutStage, SplitAmounts};
pub use swap::{SwapQuote, SwapReceipt, SwapStage};

use crate::ledger::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Pipeline stage identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Harvest,
    Swap,
    Payout,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Harvest => "harvest",
            Stage::Swap => "swap",
            Stage::Payout => "payout",
        };
        f.write_str(name)
    }
}

/// Errors that fail a stage (and so the cycle)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    #[error("Ledger error during {stage}: {source}")]
    Ledger {
        stage: Stage,
        #[source]
        source: LedgerError,
    },

    #[error("Insufficient pool liquidity for {amount_in} tokens (reserves {token_reserve}/{native_reserve})")]
    InsufficientLiquidity {
        amount_in: u64,
        token_reserve: u64,
        native_reserve: u64,
    },

    #[error("Price impact {impact_bps} bps exceeds limit {max_bps} bps")]
    ExcessivePriceImpact { impact_bps: u64, max_bps: u16 },

    #[error("Swap proceeds {received} below minimum {min_out}")]
    ProceedsBelowMinimum { received: u64, min_out: u64 },

    #[error("Balance of {account} fell from {before} to {after} during {stage}")]
    BalanceRegressed {
        stage: Stage,
        account: String,
        before: u64,
        after: u64,
    },

    #[error("Harvest consolidated nothing (estimated {estimated})")]
    NothingReceived { estimated: u64 },

    #[error("Arithmetic overflow computing {what} during {stage}")]
    ArithmeticOverflow { stage: Stage, what: &'static str },
}

impl StageError {
    /// Stage the error belongs to, for cycle records
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Ledger { stage, .. }
            | StageError::BalanceRegressed { stage, .. }
            | StageError::ArithmeticOverflow { stage, .. } => *stage,
            StageError::NothingReceived { .. } => Stage::Harvest,
            StageError::InsufficientLiquidity { .. }
            | StageError::ExcessivePriceImpact { .. }
            | StageError::ProceedsBelowMinimum { .. } => Stage::Swap,
        }
    }
}

/// Map a ledger error into a stage failure
pub(crate) fn ledger_err(stage: Stage) -> impl Fn(LedgerError) -> StageError {
    move |source| StageError::Ledger { stage, source }
}
