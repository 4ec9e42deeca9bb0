//! Tests for CycleClock
//!
//! Epoch and cycle identity must be a pure function of the wall clock.

use chrono::{DateTime, Duration, TimeZone, Utc};
use reward_distributor_core::core::time::{Clock, CycleClock, EpochId, ManualClock};
use reward_distributor_core::CycleId;

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, h, m, s).unwrap()
}

#[test]
fn test_hourly_cycles_per_epoch() {
    assert_eq!(CycleClock::new(3_600).cycles_per_epoch(), 24);
    assert_eq!(CycleClock::new(900).cycles_per_epoch(), 96);
    assert_eq!(CycleClock::new(86_400).cycles_per_epoch(), 1);
}

#[test]
fn test_first_and_last_cycle_of_day() {
    let clock = CycleClock::new(3_600);

    let first = clock.locate(at(0, 0, 0));
    assert_eq!(first.seq, 1);

    let last = clock.locate(at(23, 59, 59));
    assert_eq!(last.seq, 24);
    assert_eq!(first.epoch, last.epoch);
}

#[test]
fn test_midnight_starts_new_epoch() {
    let clock = CycleClock::new(3_600);
    let before = clock.locate(at(23, 59, 59));
    let after = clock.locate(at(23, 59, 59) + Duration::seconds(1));

    assert_eq!(after.seq, 1);
    assert_eq!(after.epoch.to_string(), "2026-10-19");
    assert!(after > before);
}

#[test]
fn test_independent_derivations_agree() {
    // Two "processes" started at different moments of the same cycle
    let a = CycleClock::new(1_800).locate(at(7, 31, 0));
    let b = CycleClock::new(1_800).locate(at(7, 59, 59));
    assert_eq!(a, b);
    assert_eq!(a.seq, 16);
}

#[test]
fn test_cycle_bounds() {
    let clock = CycleClock::new(3_600);
    let cycle = clock.locate(at(5, 10, 0));

    assert_eq!(clock.cycle_start(cycle), at(5, 0, 0));
    assert_eq!(clock.cycle_end(cycle), at(6, 0, 0));
}

#[test]
fn test_epoch_id_text_form() {
    let epoch: EpochId = "2026-10-18".parse().unwrap();
    assert_eq!(epoch.to_string(), "2026-10-18");
    assert_eq!(epoch.start(), at(0, 0, 0));
    assert_eq!(epoch.days_before(7).to_string(), "2026-10-11");

    let cycle = CycleId::new(epoch, 3);
    assert_eq!(cycle.to_string(), "2026-10-18#3");
}

#[test]
fn test_epoch_id_serializes_as_date_string() {
    let epoch: EpochId = "2026-10-18".parse().unwrap();
    assert_eq!(serde_json::to_string(&epoch).unwrap(), "\"2026-10-18\"");
}

#[test]
#[should_panic(expected = "cycle_width_secs must evenly divide one day")]
fn test_ragged_cycle_width_rejected() {
    CycleClock::new(7_000);
}

#[test]
fn test_manual_clock_advances() {
    let clock = ManualClock::new(at(1, 0, 0));
    clock.advance(Duration::minutes(90));
    assert_eq!(clock.now(), at(2, 30, 0));

    clock.set(at(9, 0, 0));
    assert_eq!(clock.now(), at(9, 0, 0));
}
