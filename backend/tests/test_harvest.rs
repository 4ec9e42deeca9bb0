//! Tests for the tax harvest stage
//!
//! The threshold gate decides between a no-op and consolidation; the amount
//! handed onward is always measured, never estimated.

use reward_distributor_core::ledger::SimulatedLedger;
use reward_distributor_core::stages::{HarvestOutcome, HarvestReceipt, HarvestStage, Stage, StageError};
use std::time::Duration;

const OPS: &str = "ops";

fn stage(min: u64) -> HarvestStage {
    HarvestStage::new(min, 2, OPS, Duration::from_secs(60))
}

fn harvested(outcome: HarvestOutcome) -> HarvestReceipt {
    match outcome {
        HarvestOutcome::Harvested(receipt) => receipt,
        other => panic!("expected a harvest, got {other:?}"),
    }
}

fn ledger_with_tax(amounts: &[u64]) -> SimulatedLedger {
    amounts
        .iter()
        .enumerate()
        .fold(SimulatedLedger::new(), |ledger, (i, amount)| {
            ledger.with_holder(&format!("holder-{i}"), 1_000, *amount)
        })
}

#[tokio::test]
async fn test_below_threshold_is_noop() {
    let ledger = ledger_with_tax(&[5_000, 5_000, 5_000]);

    let outcome = stage(20_000).run(&ledger, 0).await.unwrap();

    assert_eq!(
        outcome,
        HarvestOutcome::BelowThreshold {
            harvestable: 15_000,
            threshold: 20_000,
        }
    );
    assert_eq!(ledger.consolidate_calls(), 0);
    assert_eq!(ledger.total_withheld(), 15_000);
}

#[tokio::test]
async fn test_nothing_withheld_is_noop_even_without_threshold() {
    let ledger = SimulatedLedger::new().with_holder("holder-0", 1_000, 0);

    let outcome = stage(0).run(&ledger, 0).await.unwrap();

    assert!(matches!(outcome, HarvestOutcome::BelowThreshold { harvestable: 0, .. }));
}

#[tokio::test]
async fn test_consolidates_in_batches_and_pool() {
    let ledger = ledger_with_tax(&[10_000, 10_000, 5_000]).with_pool_withheld(5_000);

    let outcome = stage(20_000).run(&ledger, 0).await.unwrap();

    let receipt = harvested(outcome);
    assert_eq!(receipt.estimated, 30_000);
    assert_eq!(receipt.received, 30_000);
    assert_eq!(receipt.source_accounts, 3);
    // Two holder batches of at most 2 accounts plus the pool
    assert_eq!(ledger.consolidate_calls(), 3);
    assert_eq!(receipt.tx_refs.len(), 3);
    assert_eq!(ledger.token_balance_of(OPS), 30_000);
    assert_eq!(ledger.total_withheld(), 0);
}

#[tokio::test]
async fn test_received_amount_is_measured_after_transfer_tax() {
    let ledger = ledger_with_tax(&[10_000, 10_000, 10_000]).with_consolidation_fee_bps(100);

    let outcome = stage(20_000).run(&ledger, 0).await.unwrap();

    let receipt = harvested(outcome);
    assert_eq!(receipt.estimated, 30_000);
    // 1% taken from each of two batches: 200 + 100
    assert_eq!(receipt.received, 29_700);
    assert_eq!(receipt.available(), 29_700);
}

#[tokio::test]
async fn test_unrelated_operational_tokens_do_not_reach_threshold() {
    let ledger = ledger_with_tax(&[5_000, 5_000, 5_000]).with_token_balance(OPS, 10_000);

    let outcome = stage(20_000).run(&ledger, 0).await.unwrap();

    assert_eq!(
        outcome,
        HarvestOutcome::BelowThreshold {
            harvestable: 15_000,
            threshold: 20_000,
        }
    );
    assert_eq!(ledger.consolidate_calls(), 0);
    assert_eq!(ledger.token_balance_of(OPS), 10_000);
}

#[tokio::test]
async fn test_unrelated_operational_tokens_are_not_harvested() {
    let ledger = ledger_with_tax(&[10_000, 10_000, 10_000]).with_token_balance(OPS, 10_000);

    let receipt = harvested(stage(20_000).run(&ledger, 0).await.unwrap());

    assert_eq!(receipt.received, 30_000);
    assert_eq!(receipt.carried_over, 0);
    assert_eq!(receipt.available(), 30_000);
}

#[tokio::test]
async fn test_carried_tokens_join_the_swap_but_not_the_gate() {
    // A previous cycle consolidated 18_000 but its swap failed.
    let below = ledger_with_tax(&[4_000]).with_token_balance(OPS, 18_000);
    let outcome = stage(20_000).run(&below, 18_000).await.unwrap();
    assert!(matches!(outcome, HarvestOutcome::BelowThreshold { harvestable: 4_000, .. }));

    let above = ledger_with_tax(&[25_000]).with_token_balance(OPS, 18_000);
    let receipt = harvested(stage(20_000).run(&above, 18_000).await.unwrap());
    assert_eq!(receipt.received, 25_000);
    assert_eq!(receipt.carried_over, 18_000);
    assert_eq!(receipt.available(), 43_000);
}

#[tokio::test]
async fn test_carry_is_capped_at_operational_balance() {
    // The recorded carry-over is gone, e.g. a timed-out swap landed late
    let ledger = ledger_with_tax(&[30_000]).with_token_balance(OPS, 5_000);

    let receipt = harvested(stage(20_000).run(&ledger, 18_000).await.unwrap());

    assert_eq!(receipt.carried_over, 5_000);
    assert_eq!(receipt.available(), 35_000);
}

#[tokio::test]
async fn test_consolidation_that_yields_nothing_fails() {
    let ledger = ledger_with_tax(&[30_000]).with_consolidation_fee_bps(10_000);

    let err = stage(20_000).run(&ledger, 0).await.unwrap_err();

    assert_eq!(err, StageError::NothingReceived { estimated: 30_000 });
    assert_eq!(err.stage(), Stage::Harvest);
}
