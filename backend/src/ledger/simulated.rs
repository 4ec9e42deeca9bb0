//! In-memory ledger
//!
//! **Testing and dry-run use.** Models holder balances, withheld tax, a
//! constant-product pool and native balances, with knobs for injecting the
//! failures the pipeline must survive: rejected swaps, rejected or
//! never-confirming transfers, slow confirmations, and a transfer tax on
//! consolidation.

use crate::config::BPS_DENOMINATOR;
use crate::ledger::{LedgerClient, LedgerError, PoolState, SwapRequest, TxRef, WithheldBalance};
use crate::models::holder::HolderBalance;
use crate::stages::swap::constant_product_out;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// A confirmed native transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeTransfer {
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub tx_ref: TxRef,
}

#[derive(Debug)]
struct SimState {
    holders: BTreeMap<String, u64>,
    withheld: BTreeMap<String, u64>,
    pool_withheld: u64,
    token_balances: BTreeMap<String, u64>,
    native: BTreeMap<String, u64>,
    pool: PoolState,
    consolidation_fee_bps: u16,
    fixed_swap_output: Option<u64>,
    swap_failure: Option<LedgerError>,
    swap_delay: Option<Duration>,
    transfer_rejections: BTreeMap<String, u32>,
    stalled_recipients: BTreeSet<String>,
    swap_calls: usize,
    consolidate_calls: usize,
    transfer_calls: usize,
    transfers: Vec<NativeTransfer>,
    next_tx: u64,
}

impl SimState {
    fn tx_ref(&mut self) -> TxRef {
        self.next_tx += 1;
        format!("sim-{:08}", self.next_tx)
    }

    fn credit_tokens(&mut self, account: &str, gross: u64) {
        let fee = fee_of(gross, self.consolidation_fee_bps);
        *self.token_balances.entry(account.to_string()).or_insert(0) += gross - fee;
    }
}

fn fee_of(amount: u64, bps: u16) -> u64 {
    ((u128::from(amount) * u128::from(bps)) / u128::from(BPS_DENOMINATOR)) as u64
}

/// In-memory [`LedgerClient`]
#[derive(Debug)]
pub struct SimulatedLedger {
    state: Mutex<SimState>,
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLedger {
    /// Empty ledger with a deep 1:1 pool and no fees
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                holders: BTreeMap::new(),
                withheld: BTreeMap::new(),
                pool_withheld: 0,
                token_balances: BTreeMap::new(),
                native: BTreeMap::new(),
                pool: PoolState {
                    token_reserve: 1_000_000_000_000,
                    native_reserve: 1_000_000_000_000,
                    fee_bps: 0,
                    transfer_fee_bps: 0,
                },
                consolidation_fee_bps: 0,
                fixed_swap_output: None,
                swap_failure: None,
                swap_delay: None,
                transfer_rejections: BTreeMap::new(),
                stalled_recipients: BTreeSet::new(),
                swap_calls: 0,
                consolidate_calls: 0,
                transfer_calls: 0,
                transfers: Vec::new(),
                next_tx: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    pub fn with_holder(self, address: &str, balance: u64, withheld: u64) -> Self {
        {
            let mut s = self.lock();
            s.holders.insert(address.to_string(), balance);
            if withheld > 0 {
                s.withheld.insert(address.to_string(), withheld);
            }
        }
        self
    }

    pub fn with_pool(self, token_reserve: u64, native_reserve: u64, fee_bps: u16) -> Self {
        {
            let mut s = self.lock();
            s.pool.token_reserve = token_reserve;
            s.pool.native_reserve = native_reserve;
            s.pool.fee_bps = fee_bps;
        }
        self
    }

    pub fn with_transfer_fee_bps(self, bps: u16) -> Self {
        self.lock().pool.transfer_fee_bps = bps;
        self
    }

    /// Tax taken from consolidated tokens on their way to the destination
    pub fn with_consolidation_fee_bps(self, bps: u16) -> Self {
        self.lock().consolidation_fee_bps = bps;
        self
    }

    pub fn with_pool_withheld(self, amount: u64) -> Self {
        self.lock().pool_withheld = amount;
        self
    }

    pub fn with_native_balance(self, account: &str, amount: u64) -> Self {
        self.lock().native.insert(account.to_string(), amount);
        self
    }

    pub fn with_token_balance(self, account: &str, amount: u64) -> Self {
        self.lock().token_balances.insert(account.to_string(), amount);
        self
    }

    /// Every swap yields exactly `amount` native units
    pub fn with_fixed_swap_output(self, amount: u64) -> Self {
        self.lock().fixed_swap_output = Some(amount);
        self
    }

    // ------------------------------------------------------------------
    // Runtime knobs
    // ------------------------------------------------------------------

    pub fn set_withheld(&self, account: &str, amount: u64) {
        self.lock().withheld.insert(account.to_string(), amount);
    }

    pub fn set_holder_balance(&self, address: &str, balance: u64) {
        self.lock().holders.insert(address.to_string(), balance);
    }

    pub fn fail_next_swap(&self, error: LedgerError) {
        self.lock().swap_failure = Some(error);
    }

    pub fn set_swap_delay(&self, delay: Option<Duration>) {
        self.lock().swap_delay = delay;
    }

    /// Reject the next `times` transfers to `recipient`
    pub fn reject_transfers_to(&self, recipient: &str, times: u32) {
        self.lock()
            .transfer_rejections
            .insert(recipient.to_string(), times);
    }

    /// Transfers to `recipient` never confirm
    pub fn stall_transfers_to(&self, recipient: &str) {
        self.lock().stalled_recipients.insert(recipient.to_string());
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn swap_calls(&self) -> usize {
        self.lock().swap_calls
    }

    pub fn consolidate_calls(&self) -> usize {
        self.lock().consolidate_calls
    }

    pub fn transfer_calls(&self) -> usize {
        self.lock().transfer_calls
    }

    pub fn transfers(&self) -> Vec<NativeTransfer> {
        self.lock().transfers.clone()
    }

    pub fn native_balance_of(&self, account: &str) -> u64 {
        self.lock().native.get(account).copied().unwrap_or(0)
    }

    pub fn token_balance_of(&self, account: &str) -> u64 {
        let s = self.lock();
        s.token_balances
            .get(account)
            .or_else(|| s.holders.get(account))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_withheld(&self) -> u64 {
        let s = self.lock();
        s.withheld.values().sum::<u64>() + s.pool_withheld
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn withheld_balances(&self) -> Result<Vec<WithheldBalance>, LedgerError> {
        Ok(self
            .lock()
            .withheld
            .iter()
            .map(|(account, amount)| WithheldBalance {
                account: account.clone(),
                amount: *amount,
            })
            .collect())
    }

    async fn pool_withheld(&self) -> Result<u64, LedgerError> {
        Ok(self.lock().pool_withheld)
    }

    async fn consolidate_withheld(&self, sources: &[String], destination: &str) -> Result<TxRef, LedgerError> {
        let mut s = self.lock();
        s.consolidate_calls += 1;
        let mut gross = 0u64;
        for source in sources {
            gross += s.withheld.remove(source).unwrap_or(0);
        }
        s.credit_tokens(destination, gross);
        Ok(s.tx_ref())
    }

    async fn consolidate_pool_withheld(&self, destination: &str) -> Result<TxRef, LedgerError> {
        let mut s = self.lock();
        s.consolidate_calls += 1;
        let gross = std::mem::take(&mut s.pool_withheld);
        s.credit_tokens(destination, gross);
        Ok(s.tx_ref())
    }

    async fn token_balance(&self, account: &str) -> Result<u64, LedgerError> {
        Ok(self.token_balance_of(account))
    }

    async fn pool_state(&self) -> Result<PoolState, LedgerError> {
        Ok(self.lock().pool)
    }

    async fn ensure_native_account(&self, owner: &str) -> Result<String, LedgerError> {
        let account = format!("{owner}/native");
        self.lock().native.entry(account.clone()).or_insert(0);
        Ok(account)
    }

    async fn native_balance(&self, account: &str) -> Result<u64, LedgerError> {
        self.lock()
            .native
            .get(account)
            .copied()
            .ok_or_else(|| LedgerError::AccountNotFound(account.to_string()))
    }

    async fn swap_exact_in(&self, request: &SwapRequest) -> Result<TxRef, LedgerError> {
        let delay = self.lock().swap_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut s = self.lock();
        s.swap_calls += 1;
        if let Some(error) = s.swap_failure.take() {
            return Err(error);
        }

        let available = s.token_balances.get(&request.payer).copied().unwrap_or(0);
        if available < request.amount_in {
            return Err(LedgerError::Rejected(format!(
                "insufficient token balance: {} < {}",
                available, request.amount_in
            )));
        }
        if !s.native.contains_key(&request.destination) {
            return Err(LedgerError::AccountNotFound(request.destination.clone()));
        }

        let pool = s.pool;
        let effective_in = request.amount_in - fee_of(request.amount_in, pool.transfer_fee_bps);
        let out = match s.fixed_swap_output {
            Some(out) => out,
            None => constant_product_out(&pool, request.amount_in)
                .ok_or_else(|| LedgerError::SimulationFailed("pool math overflow".to_string()))?,
        };
        if out < request.min_amount_out {
            return Err(LedgerError::SimulationFailed(format!(
                "slippage exceeded: out {} < min {}",
                out, request.min_amount_out
            )));
        }
        if out > pool.native_reserve {
            return Err(LedgerError::SimulationFailed("pool reserve exhausted".to_string()));
        }

        *s.token_balances.entry(request.payer.clone()).or_insert(0) -= request.amount_in;
        s.pool.token_reserve += effective_in;
        s.pool.native_reserve -= out;
        *s.native.entry(request.destination.clone()).or_insert(0) += out;
        Ok(s.tx_ref())
    }

    async fn transfer_native(&self, from: &str, to: &str, amount: u64) -> Result<TxRef, LedgerError> {
        let stalled = {
            let mut s = self.lock();
            s.transfer_calls += 1;
            s.stalled_recipients.contains(to)
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut s = self.lock();
        if let Some(remaining) = s.transfer_rejections.get_mut(to) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LedgerError::Rejected(format!("transfer to {to} rejected")));
            }
        }

        let balance = s.native.get(from).copied().unwrap_or(0);
        if balance < amount {
            return Err(LedgerError::Rejected(format!(
                "insufficient funds in {from}: {balance} < {amount}"
            )));
        }
        *s.native.entry(from.to_string()).or_insert(0) -= amount;
        *s.native.entry(to.to_string()).or_insert(0) += amount;

        let tx_ref = s.tx_ref();
        s.transfers.push(NativeTransfer {
            from: from.to_string(),
            to: to.to_string(),
            amount,
            tx_ref: tx_ref.clone(),
        });
        Ok(tx_ref)
    }

    async fn holder_balances(&self) -> Result<Vec<HolderBalance>, LedgerError> {
        Ok(self
            .lock()
            .holders
            .iter()
            .map(|(address, balance)| HolderBalance::new(address.clone(), *balance))
            .collect())
    }
}
