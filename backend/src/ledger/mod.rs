//! Ledger collaborator
//!
//! The distributor never builds transactions itself. Everything it needs
//! from the distributed ledger goes through [`LedgerClient`]: balance
//! queries, tax consolidation, pool state, the swap, and native transfers.
//! Each mutating call returns once the operation is confirmed and yields a
//! transaction reference.
//!
//! Confirmation waits are bounded by the caller with [`with_confirmation`];
//! a timeout is an *ambiguous* outcome (the operation may still land), every
//! other error is a definite rejection.

pub mod simulated;

pub use simulated::SimulatedLedger;

use crate::models::holder::HolderBalance;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Transaction reference (signature / hash) returned by the ledger
pub type TxRef = String;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Operation rejected: {0}")]
    Rejected(String),

    #[error("Simulation failed: {0}")]
    SimulationFailed(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("{operation} not confirmed within {after_ms} ms")]
    ConfirmationTimeout { operation: String, after_ms: u64 },
}

impl LedgerError {
    /// True when the operation may have been applied despite the error
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, LedgerError::ConfirmationTimeout { .. })
    }
}

/// Tax withheld on one token account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithheldBalance {
    pub account: String,
    pub amount: u64,
}

/// Constant-product pool reserves and fees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    pub token_reserve: u64,
    pub native_reserve: u64,
    /// Pool trading fee
    pub fee_bps: u16,
    /// The token's own transfer tax, charged on the way into the pool
    pub transfer_fee_bps: u16,
}

/// Exact-input swap of tokens for native currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    /// Signer and owner of the token source
    pub payer: String,
    pub amount_in: u64,
    pub min_amount_out: u64,
    /// Account credited with the native output
    pub destination: String,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Withheld transfer tax per holder token account
    async fn withheld_balances(&self) -> Result<Vec<WithheldBalance>, LedgerError>;

    /// Tax already withheld at pool/mint level
    async fn pool_withheld(&self) -> Result<u64, LedgerError>;

    /// Move withheld tax from `sources` into `destination`
    async fn consolidate_withheld(&self, sources: &[String], destination: &str) -> Result<TxRef, LedgerError>;

    /// Move the pool-level withheld amount into `destination`
    async fn consolidate_pool_withheld(&self, destination: &str) -> Result<TxRef, LedgerError>;

    async fn token_balance(&self, account: &str) -> Result<u64, LedgerError>;

    async fn pool_state(&self) -> Result<PoolState, LedgerError>;

    /// Make sure `owner` has an account able to receive the native output of
    /// a swap; returns that account's address
    async fn ensure_native_account(&self, owner: &str) -> Result<String, LedgerError>;

    async fn native_balance(&self, account: &str) -> Result<u64, LedgerError>;

    async fn swap_exact_in(&self, request: &SwapRequest) -> Result<TxRef, LedgerError>;

    async fn transfer_native(&self, from: &str, to: &str, amount: u64) -> Result<TxRef, LedgerError>;

    /// Token balances of all holders
    async fn holder_balances(&self) -> Result<Vec<HolderBalance>, LedgerError>;
}

/// Await a ledger operation, giving up after `limit`
pub async fn with_confirmation<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T, LedgerError>
where
    F: Future<Output = Result<T, LedgerError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::ConfirmationTimeout {
            operation: operation.to_string(),
            after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
