//! Tests for the swap stage
//!
//! Proceeds come from the swap's own output account; a pre-existing native
//! balance elsewhere must never leak into them.

use reward_distributor_core::ledger::{LedgerError, SimulatedLedger};
use reward_distributor_core::stages::{Stage, StageError, SwapStage};
use std::time::Duration;

const OPS: &str = "ops";

fn stage() -> SwapStage {
    SwapStage::new(OPS, 100, 500, Duration::from_secs(60))
}

fn funded_ledger(tokens: u64) -> SimulatedLedger {
    SimulatedLedger::new()
        .with_pool(1_000_000_000, 1_000_000_000, 30)
        .with_token_balance(OPS, tokens)
}

#[tokio::test]
async fn test_swap_measures_output_account_only() {
    // The payer holds unrelated native funds; they must not count.
    let ledger = funded_ledger(30_000).with_native_balance(OPS, 5_000_000_000);

    let receipt = stage().run(&ledger, 30_000).await.unwrap();

    assert_eq!(receipt.output_account, "ops/native");
    assert_eq!(receipt.proceeds, ledger.native_balance_of("ops/native"));
    assert_eq!(receipt.proceeds, receipt.quote.expected_out);
    assert!(receipt.proceeds >= receipt.quote.min_out);
    assert!(receipt.proceeds < 30_000);
    assert_eq!(ledger.native_balance_of(OPS), 5_000_000_000);
    assert_eq!(ledger.token_balance_of(OPS), 0);
}

#[tokio::test]
async fn test_output_account_created_before_swap() {
    let ledger = funded_ledger(10_000);
    assert_eq!(ledger.native_balance_of("ops/native"), 0);

    stage().run(&ledger, 10_000).await.unwrap();

    assert!(ledger.native_balance_of("ops/native") > 0);
}

#[tokio::test]
async fn test_existing_output_balance_is_not_proceeds() {
    let ledger = funded_ledger(10_000).with_native_balance("ops/native", 123_456);

    let receipt = stage().run(&ledger, 10_000).await.unwrap();

    assert_eq!(
        ledger.native_balance_of("ops/native"),
        123_456 + receipt.proceeds
    );
}

#[tokio::test]
async fn test_token_transfer_tax_reduces_proceeds() {
    let untaxed = funded_ledger(100_000);
    let taxed = funded_ledger(100_000).with_transfer_fee_bps(500);

    let plain = stage().run(&untaxed, 100_000).await.unwrap();
    let receipt = stage().run(&taxed, 100_000).await.unwrap();

    assert_eq!(receipt.quote.effective_in, 95_000);
    assert_eq!(receipt.proceeds, receipt.quote.expected_out);
    assert!(receipt.proceeds < plain.proceeds);
}

#[tokio::test]
async fn test_excessive_price_impact_refused_before_submission() {
    let ledger = SimulatedLedger::new()
        .with_pool(100_000, 100_000, 0)
        .with_token_balance(OPS, 50_000);

    let err = stage().run(&ledger, 50_000).await.unwrap_err();

    assert!(matches!(err, StageError::ExcessivePriceImpact { .. }));
    assert_eq!(err.stage(), Stage::Swap);
    assert_eq!(ledger.swap_calls(), 0);
}

#[tokio::test]
async fn test_empty_pool_is_insufficient_liquidity() {
    let ledger = SimulatedLedger::new().with_pool(0, 0, 0).with_token_balance(OPS, 1_000);

    let err = stage().run(&ledger, 1_000).await.unwrap_err();

    assert!(matches!(err, StageError::InsufficientLiquidity { .. }));
    assert_eq!(ledger.swap_calls(), 0);
}

#[tokio::test]
async fn test_simulation_failure_fails_stage() {
    let ledger = funded_ledger(10_000);
    ledger.fail_next_swap(LedgerError::SimulationFailed("pool paused".to_string()));

    let err = stage().run(&ledger, 10_000).await.unwrap_err();

    assert_eq!(
        err,
        StageError::Ledger {
            stage: Stage::Swap,
            source: LedgerError::SimulationFailed("pool paused".to_string()),
        }
    );
    // Nothing moved
    assert_eq!(ledger.token_balance_of(OPS), 10_000);
}

#[tokio::test(start_paused = true)]
async fn test_slow_confirmation_times_out() {
    let ledger = funded_ledger(10_000);
    ledger.set_swap_delay(Some(Duration::from_secs(120)));

    let err = stage().run(&ledger, 10_000).await.unwrap_err();

    match err {
        StageError::Ledger { stage, source } => {
            assert_eq!(stage, Stage::Swap);
            assert!(source.is_ambiguous());
        }
        other => panic!("expected a ledger timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_output_below_minimum_is_rejected_by_ledger() {
    // The pool would pay far less than quoted: a fixed 1 unit output.
    let ledger = funded_ledger(10_000).with_fixed_swap_output(1);

    let err = stage().run(&ledger, 10_000).await.unwrap_err();

    assert!(matches!(
        err,
        StageError::Ledger {
            source: LedgerError::SimulationFailed(_),
            ..
        }
    ));
}
