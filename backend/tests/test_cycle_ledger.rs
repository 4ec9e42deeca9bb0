//! Tests for the Epoch/Cycle ledger
//!
//! Covers contiguous numbering, idempotent terminal writes, retention
//! pruning, and preservation of unknown fields.

use chrono::{DateTime, Duration, TimeZone, Utc};
use reward_distributor_core::core::time::{CycleClock, CycleId, EpochId};
use reward_distributor_core::models::cycle::{
    CycleLedger, CycleLedgerError, CycleResult, CycleState, RecordOutcome,
};
use reward_distributor_core::models::snapshot::DistributionSnapshot;
use reward_distributor_core::stages::Stage;

fn day(d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, d, h, 0, 0).unwrap()
}

fn snapshot(cycle: CycleId, at: DateTime<Utc>) -> DistributionSnapshot {
    DistributionSnapshot {
        epoch_id: cycle.epoch,
        cycle_seq: cycle.seq,
        harvest_amount: 30_000,
        swapped_amount: 30_000,
        native_proceeds: 1_000_000,
        holders_amount: 750_000,
        treasury_amount: 250_000,
        recipient_count: 3,
        outstanding_count: 0,
        tx_refs: vec!["sim-00000001".to_string()],
        distributed_at: at,
    }
}

#[test]
fn test_epoch_created_with_contiguous_pending_cycles() {
    let clock = CycleClock::new(7_200);
    let mut ledger = CycleLedger::default();

    let cycle = ledger.observe(&clock, day(18, 13));
    let epoch = ledger.get_epoch(cycle.epoch).unwrap();

    assert_eq!(epoch.cycles.len(), 12);
    for (idx, c) in epoch.cycles.iter().enumerate() {
        assert_eq!(c.seq, idx as u32 + 1);
        assert_eq!(c.state, CycleState::Pending);
    }
}

#[test]
fn test_record_distributed_stores_snapshot() {
    let clock = CycleClock::new(3_600);
    let mut ledger = CycleLedger::default();
    let cycle = ledger.observe(&clock, day(18, 4));

    let outcome = ledger
        .record(cycle, CycleResult::Distributed(snapshot(cycle, day(18, 4))), &clock, day(18, 4))
        .unwrap();

    assert_eq!(outcome, RecordOutcome::Recorded);
    let stored = ledger.cycle(cycle).unwrap();
    assert_eq!(stored.state, CycleState::Distributed);
    assert_eq!(stored.snapshot.as_ref().unwrap().owner(), cycle);
}

#[test]
fn test_same_terminal_write_twice_is_noop() {
    let clock = CycleClock::new(3_600);
    let mut ledger = CycleLedger::default();
    let cycle = ledger.observe(&clock, day(18, 4));
    let result = CycleResult::RolledOver {
        harvestable: 15_000,
        threshold: 20_000,
    };

    ledger.record(cycle, result.clone(), &clock, day(18, 4)).unwrap();
    let before = ledger.clone();
    let second = ledger.record(cycle, result, &clock, day(18, 5)).unwrap();

    assert_eq!(second, RecordOutcome::AlreadyRecorded);
    assert_eq!(ledger, before);
}

#[test]
fn test_no_transition_out_of_terminal_state() {
    let clock = CycleClock::new(3_600);
    let mut ledger = CycleLedger::default();
    let cycle = ledger.observe(&clock, day(18, 4));

    ledger
        .record(
            cycle,
            CycleResult::Failed {
                stage: Stage::Swap,
                reason: "insufficient liquidity".to_string(),
            },
            &clock,
            day(18, 4),
        )
        .unwrap();

    let err = ledger
        .record(cycle, CycleResult::Distributed(snapshot(cycle, day(18, 4))), &clock, day(18, 4))
        .unwrap_err();
    assert_eq!(
        err,
        CycleLedgerError::TerminalConflict {
            cycle,
            existing: CycleState::Failed,
            attempted: CycleState::Distributed,
        }
    );
    let stored = ledger.cycle(cycle).unwrap();
    assert_eq!(stored.failed_stage, Some(Stage::Swap));
    assert!(stored.snapshot.is_none());
}

#[test]
fn test_out_of_range_cycle_rejected() {
    let clock = CycleClock::new(3_600);
    let mut ledger = CycleLedger::default();
    let epoch: EpochId = "2026-10-18".parse().unwrap();

    let err = ledger
        .record(
            CycleId::new(epoch, 25),
            CycleResult::RolledOver {
                harvestable: 0,
                threshold: 0,
            },
            &clock,
            day(18, 1),
        )
        .unwrap_err();
    assert_eq!(err, CycleLedgerError::InvalidCycle { seq: 25, max: 24 });
}

#[test]
fn test_record_under_a_different_width_rejected() {
    let two_hourly = CycleClock::new(7_200);
    let hourly = CycleClock::new(3_600);
    let mut ledger = CycleLedger::default();
    let id = ledger.observe(&two_hourly, day(18, 5));
    assert_eq!(id.seq, 3);
    assert_eq!(ledger.latest_cycle_width(), Some(7_200));

    let err = ledger
        .record(
            hourly.locate(day(18, 5)),
            CycleResult::RolledOver {
                harvestable: 0,
                threshold: 0,
            },
            &hourly,
            day(18, 5),
        )
        .unwrap_err();

    assert_eq!(
        err,
        CycleLedgerError::WidthMismatch {
            epoch: id.epoch,
            stored_secs: 7_200,
            configured_secs: 3_600,
        }
    );
    assert_eq!(ledger.get_epoch(id.epoch).unwrap().cycles.len(), 12);
    assert_eq!(ledger.state_of(id), CycleState::Pending);

    // The next epoch is created with the new width
    assert!(ledger.width_conflict(&hourly, id.epoch).is_some());
    let next = ledger.observe(&hourly, day(19, 5));
    assert!(ledger.width_conflict(&hourly, next.epoch).is_none());
    assert_eq!(ledger.latest_cycle_width(), Some(3_600));
}

#[test]
fn test_missed_cycles_stay_pending() {
    let clock = CycleClock::new(3_600);
    let mut ledger = CycleLedger::default();

    let early = ledger.observe(&clock, day(18, 1));
    ledger
        .record(early, CycleResult::RolledOver { harvestable: 0, threshold: 0 }, &clock, day(18, 1))
        .unwrap();
    // Process was down between 02:00 and 09:00
    let late = ledger.observe(&clock, day(18, 9));

    let epoch = ledger.get_epoch(late.epoch).unwrap();
    assert_eq!(epoch.count(CycleState::RolledOver), 1);
    assert_eq!(epoch.count(CycleState::Pending), 23);
    assert_eq!(ledger.current_cycle_number, Some(10));
}

#[test]
fn test_prune_drops_epochs_outside_window() {
    let clock = CycleClock::new(3_600);
    let mut ledger = CycleLedger::default();
    for d in 1..=10 {
        ledger.observe(&clock, day(d, 12));
    }

    let today = EpochId::containing(day(10, 12));
    let pruned = ledger.prune(today, 7);

    assert_eq!(pruned.len(), 2);
    assert_eq!(ledger.epochs.len(), 8);
    assert_eq!(
        ledger.epochs.keys().next().copied(),
        Some(EpochId::containing(day(3, 0)))
    );
}

#[test]
fn test_list_epochs_newest_first() {
    let clock = CycleClock::new(3_600);
    let mut ledger = CycleLedger::default();
    let start = day(15, 6);
    for offset in 0..3 {
        ledger.observe(&clock, start + Duration::days(offset));
    }

    let listed: Vec<String> = ledger
        .list_epochs(2)
        .into_iter()
        .map(|(id, _)| id.to_string())
        .collect();
    assert_eq!(listed, vec!["2026-10-17", "2026-10-16"]);
}

#[test]
fn test_document_uses_camel_case_layout_and_keeps_unknown_fields() {
    let json = r#"{
        "epochs": {
            "2026-10-18": {
                "cycles": [{"seq": 1, "state": "ROLLED_OVER", "harvestable": 5, "operatorNote": "slow"}],
                "createdAt": "2026-10-18T00:00:00Z",
                "updatedAt": "2026-10-18T00:10:00Z"
            }
        },
        "currentEpoch": "2026-10-18",
        "currentCycleNumber": 1,
        "dashboardCursor": 42
    }"#;

    let ledger: CycleLedger = serde_json::from_str(json).unwrap();
    let epoch: EpochId = "2026-10-18".parse().unwrap();
    assert_eq!(ledger.state_of(CycleId::new(epoch, 1)), CycleState::RolledOver);

    let written = serde_json::to_value(&ledger).unwrap();
    assert_eq!(written["dashboardCursor"], 42);
    assert_eq!(written["currentCycleNumber"], 1);
    assert_eq!(written["epochs"]["2026-10-18"]["cycles"][0]["operatorNote"], "slow");
}
