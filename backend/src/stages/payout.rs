//! Split & Payout Stage
//!
//! Divides swap proceeds between holders and the treasury, pays each
//! eligible holder its pro-rata share, and pays the treasury its share in
//! one transfer.
//!
//! # Critical Invariants
//!
//! 1. **Exact split**: `holders_amount + treasury_amount == proceeds`; the
//!    treasury takes the rounding remainder of the ratio split, and the
//!    holder share is allocated down to the last unit (largest remainder)
//! 2. **Independent payouts**: each transfer has its own retry budget; one
//!    failing recipient never blocks the others or the cycle
//! 3. **No blind retries**: a definitively rejected transfer is retried up to
//!    `max_retries` times, a transfer whose confirmation timed out is never
//!    retried (it may have landed) and is left for an operator
//!
//! Payouts that do not confirm become [`Obligation`]s. Outstanding
//! obligations from earlier cycles are retried at the start of this stage.

use crate::config::{DistributorConfig, BPS_DENOMINATOR};
use crate::core::time::CycleId;
use crate::ledger::{with_confirmation, LedgerClient, TxRef};
use crate::models::event::Event;
use crate::models::holder::{EligibilityRules, HolderEligibility};
use crate::models::obligation::{Obligation, ObligationStatus, PayoutKind, SettledObligation};
use crate::stages::{ledger_err, Stage, StageError};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Ratio split of the proceeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitAmounts {
    pub holders: u64,
    pub treasury: u64,
}

/// Split `proceeds` with `holders_share_bps` to holders, the rest to treasury
///
/// # Example
/// ```
/// use reward_distributor_core::stages::payout::split;
///
/// let amounts = split(1_000_000, 7_500);
/// assert_eq!(amounts.holders, 750_000);
/// assert_eq!(amounts.treasury, 250_000);
/// ```
pub fn split(proceeds: u64, holders_share_bps: u16) -> SplitAmounts {
    let bps = u128::from(holders_share_bps).min(u128::from(BPS_DENOMINATOR));
    // bps <= 10_000, so the share never exceeds `proceeds` and fits in u64
    let holders = (u128::from(proceeds) * bps / u128::from(BPS_DENOMINATOR)) as u64;
    SplitAmounts {
        holders,
        treasury: proceeds - holders,
    }
}

/// One holder's share
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub recipient: String,
    pub balance: u64,
    pub amount: u64,
}

/// Allocate `total` across eligible holders in proportion to balance
///
/// Floors every share, then hands the leftover units one each to the
/// holders with the largest fractional remainders (ties: larger balance,
/// then address). Zero allocations are dropped.
pub fn allocate_pro_rata(total: u64, holders: &[HolderEligibility]) -> Vec<Allocation> {
    let eligible: Vec<&HolderEligibility> = holders.iter().filter(|h| h.eligible).collect();
    let total_balance: u128 = eligible.iter().map(|h| u128::from(h.balance)).sum();
    if eligible.is_empty() || total_balance == 0 || total == 0 {
        return Vec::new();
    }

    let mut shares: Vec<(Allocation, u128)> = eligible
        .iter()
        .map(|h| {
            let exact = u128::from(total) * u128::from(h.balance);
            let floor = (exact / total_balance) as u64;
            let remainder = exact % total_balance;
            (
                Allocation {
                    recipient: h.address.clone(),
                    balance: h.balance,
                    amount: floor,
                },
                remainder,
            )
        })
        .collect();

    let floored: u64 = shares.iter().map(|(a, _)| a.amount).sum();
    let leftover = (total - floored) as usize;

    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|&a, &b| {
        let (alloc_a, rem_a) = &shares[a];
        let (alloc_b, rem_b) = &shares[b];
        rem_b
            .cmp(rem_a)
            .then(alloc_b.balance.cmp(&alloc_a.balance))
            .then(alloc_a.recipient.cmp(&alloc_b.recipient))
    });
    for &idx in order.iter().take(leftover) {
        shares[idx].0.amount += 1;
    }

    shares
        .into_iter()
        .map(|(allocation, _)| allocation)
        .filter(|a| a.amount > 0)
        .collect()
}

/// Final result of one payout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutResult {
    Paid { tx_ref: TxRef, attempts: u32 },
    Deferred {
        status: ObligationStatus,
        attempts: u32,
        error: String,
    },
}

/// A payout and how it ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutRecord {
    pub kind: PayoutKind,
    pub recipient: String,
    pub amount: u64,
    pub result: PayoutResult,
}

/// Earlier obligation that failed again
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    pub id: Uuid,
    pub attempts: u32,
    pub status: ObligationStatus,
    pub error: String,
}

/// Inputs for one payout run
#[derive(Debug, Clone)]
pub struct PayoutInput<'a> {
    /// Cycle that owns this distribution
    pub cycle: CycleId,
    /// Swap output account holding the proceeds
    pub source_account: &'a str,
    pub proceeds: u64,
    pub holders: &'a [HolderEligibility],
    /// Outstanding obligations to retry first
    pub obligations: &'a [Obligation],
    pub now: DateTime<Utc>,
}

/// Everything the payout stage did
#[derive(Debug, Clone, Default)]
pub struct PayoutReport {
    pub holders_amount: u64,
    pub treasury_amount: u64,
    pub payouts: Vec<PayoutRecord>,
    pub new_obligations: Vec<Obligation>,
    pub settled: Vec<SettledObligation>,
    pub retry_failures: Vec<RetryFailure>,
    pub events: Vec<Event>,
}

impl PayoutReport {
    /// Holder payouts allocated this cycle (paid or deferred)
    pub fn recipient_count(&self) -> u32 {
        let holders = self
            .payouts
            .iter()
            .filter(|p| p.kind == PayoutKind::Holder)
            .count();
        u32::try_from(holders).unwrap_or(u32::MAX)
    }

    pub fn outstanding_count(&self) -> u32 {
        u32::try_from(self.new_obligations.len()).unwrap_or(u32::MAX)
    }

    /// References of this cycle's confirmed payouts
    pub fn tx_refs(&self) -> Vec<TxRef> {
        self.payouts
            .iter()
            .filter_map(|p| match &p.result {
                PayoutResult::Paid { tx_ref, .. } => Some(tx_ref.clone()),
                PayoutResult::Deferred { .. } => None,
            })
            .collect()
    }
}

/// Payout stage settings
#[derive(Debug, Clone)]
pub struct PayoutStage {
    treasury_account: String,
    holders_share_bps: u16,
    max_retries: u32,
    retry_delay: Duration,
    confirmation_timeout: Duration,
    rules: EligibilityRules,
}

impl PayoutStage {
    pub fn new(
        treasury_account: impl Into<String>,
        holders_share_bps: u16,
        max_retries: u32,
        retry_delay: Duration,
        confirmation_timeout: Duration,
        rules: EligibilityRules,
    ) -> Self {
        Self {
            treasury_account: treasury_account.into(),
            holders_share_bps,
            max_retries,
            retry_delay,
            confirmation_timeout,
            rules,
        }
    }

    pub fn from_config(config: &DistributorConfig) -> Self {
        Self::new(
            config.treasury_account.clone(),
            config.holders_share_bps,
            config.max_payout_retries,
            config.payout_retry_delay(),
            config.confirmation_timeout(),
            config.eligibility_rules(),
        )
    }

    /// Snapshot holder balances and flag eligibility
    pub async fn eligible_holders(&self, ledger: &dyn LedgerClient) -> Result<Vec<HolderEligibility>, StageError> {
        let balances = ledger
            .holder_balances()
            .await
            .map_err(ledger_err(Stage::Payout))?;
        Ok(self.rules.evaluate(&balances))
    }

    /// Split the proceeds, settle old obligations, and pay everyone
    pub async fn run(&self, ledger: &dyn LedgerClient, input: PayoutInput<'_>) -> PayoutReport {
        let mut report = PayoutReport::default();
        let cycle = input.cycle;

        self.retry_obligations(ledger, &input, &mut report).await;

        let SplitAmounts { holders, treasury } = split(input.proceeds, self.holders_share_bps);
        let allocations = allocate_pro_rata(holders, input.holders);
        // With no eligible holder the holder share goes to the treasury.
        let holders_amount: u64 = allocations.iter().map(|a| a.amount).sum();
        let treasury_amount = input.proceeds - holders_amount;
        if holders_amount == 0 && holders > 0 {
            warn!(%cycle, holders, "no eligible holders; holder share sent to treasury");
        }
        report.holders_amount = holders_amount;
        report.treasury_amount = treasury_amount;
        debug_assert_eq!(holders_amount + treasury_amount, holders + treasury);

        for allocation in allocations {
            self.pay(
                ledger,
                &input,
                PayoutKind::Holder,
                allocation.recipient,
                allocation.amount,
                &mut report,
            )
            .await;
        }

        if treasury_amount > 0 {
            self.pay(
                ledger,
                &input,
                PayoutKind::Treasury,
                self.treasury_account.clone(),
                treasury_amount,
                &mut report,
            )
            .await;
        }

        info!(
            %cycle,
            holders_amount,
            treasury_amount,
            recipients = report.recipient_count(),
            deferred = report.outstanding_count(),
            "payouts complete"
        );
        report
    }

    async fn retry_obligations(&self, ledger: &dyn LedgerClient, input: &PayoutInput<'_>, report: &mut PayoutReport) {
        let pending = input
            .obligations
            .iter()
            .filter(|o| o.status == ObligationStatus::Outstanding);

        for obligation in pending {
            match self
                .send_with_retry(ledger, input.source_account, &obligation.recipient, obligation.amount)
                .await
            {
                PayoutResult::Paid { tx_ref, attempts } => {
                    info!(
                        obligation = %obligation.id,
                        owner = %obligation.owner,
                        amount = obligation.amount,
                        "obligation settled"
                    );
                    report.events.push(Event::ObligationSettled {
                        cycle: input.cycle,
                        obligation_id: obligation.id,
                        owner: obligation.owner,
                        amount: obligation.amount,
                        tx_ref: tx_ref.clone(),
                    });
                    report.settled.push(SettledObligation {
                        id: obligation.id,
                        tx_ref,
                        attempts,
                    });
                }
                PayoutResult::Deferred { status, attempts, error } => {
                    report.retry_failures.push(RetryFailure {
                        id: obligation.id,
                        attempts,
                        status,
                        error,
                    });
                }
            }
        }
    }

    async fn pay(
        &self,
        ledger: &dyn LedgerClient,
        input: &PayoutInput<'_>,
        kind: PayoutKind,
        recipient: String,
        amount: u64,
        report: &mut PayoutReport,
    ) {
        let result = self
            .send_with_retry(ledger, input.source_account, &recipient, amount)
            .await;

        match &result {
            PayoutResult::Paid { tx_ref, attempts } => {
                report.events.push(Event::PayoutSent {
                    cycle: input.cycle,
                    kind,
                    recipient: recipient.clone(),
                    amount,
                    attempts: *attempts,
                    tx_ref: tx_ref.clone(),
                });
            }
            PayoutResult::Deferred { status, attempts, error } => {
                report.events.push(Event::PayoutDeferred {
                    cycle: input.cycle,
                    kind,
                    recipient: recipient.clone(),
                    amount,
                    attempts: *attempts,
                    status: *status,
                    error: error.clone(),
                });
                report.new_obligations.push(Obligation::new(
                    kind,
                    recipient.clone(),
                    amount,
                    input.cycle,
                    *attempts,
                    error.clone(),
                    *status,
                    input.now,
                ));
            }
        }

        report.payouts.push(PayoutRecord {
            kind,
            recipient,
            amount,
            result,
        });
    }

    /// One transfer with its own bounded retry budget
    async fn send_with_retry(&self, ledger: &dyn LedgerClient, from: &str, to: &str, amount: u64) -> PayoutResult {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let sent = with_confirmation(
                "transfer_native",
                self.confirmation_timeout,
                ledger.transfer_native(from, to, amount),
            )
            .await;

            match sent {
                Ok(tx_ref) => return PayoutResult::Paid { tx_ref, attempts },
                Err(e) if e.is_ambiguous() => {
                    warn!(recipient = to, amount, error = %e, "payout unconfirmed; not retrying");
                    return PayoutResult::Deferred {
                        status: ObligationStatus::Unconfirmed,
                        attempts,
                        error: e.to_string(),
                    };
                }
                Err(e) if attempts > self.max_retries => {
                    warn!(recipient = to, amount, attempts, error = %e, "payout retries exhausted");
                    return PayoutResult::Deferred {
                        status: ObligationStatus::Outstanding,
                        attempts,
                        error: e.to_string(),
                    };
                }
                Err(e) => {
                    warn!(recipient = to, amount, attempts, error = %e, "payout failed; retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}
