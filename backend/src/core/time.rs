//! Cycle clock
//!
//! Wall-clock time is divided into calendar-day epochs (UTC) and fixed-width
//! cycles within each epoch. The mapping is a pure function of the timestamp:
//! two processes started on the same date derive the same identifiers without
//! coordinating.
//!
//! # Critical Invariants
//!
//! 1. Cycle numbers run `1..=N` within an epoch, `N = 86_400 / cycle_width_secs`
//! 2. The cycle width must divide the day exactly (no ragged final cycle)

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

/// Length of one epoch in seconds
pub const SECONDS_PER_DAY: u32 = 86_400;

/// Calendar-day epoch identifier, rendered as `YYYY-MM-DD`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochId(NaiveDate);

impl EpochId {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Epoch containing the given instant (UTC calendar day)
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self(at.date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Epoch `days` calendar days earlier
    pub fn days_before(&self, days: u32) -> Self {
        Self(self.0 - Duration::days(i64::from(days)))
    }

    /// Midnight UTC at the start of this epoch
    pub fn start(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.0.and_time(NaiveTime::MIN))
    }
}

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for EpochId {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Self)
    }
}

/// A single cycle: `(epoch, sequence)` with sequence starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CycleId {
    pub epoch: EpochId,
    pub seq: u32,
}

impl CycleId {
    pub fn new(epoch: EpochId, seq: u32) -> Self {
        Self { epoch, seq }
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.epoch, self.seq)
    }
}

/// Derives epoch and cycle identifiers from wall-clock time
///
/// # Example
/// ```
/// use chrono::{TimeZone, Utc};
/// use reward_distributor_core::CycleClock;
///
/// let clock = CycleClock::new(3_600); // hourly cycles
/// assert_eq!(clock.cycles_per_epoch(), 24);
///
/// let at = Utc.with_ymd_and_hms(2026, 10, 18, 0, 30, 0).unwrap();
/// let cycle = clock.locate(at);
/// assert_eq!(cycle.epoch.to_string(), "2026-10-18");
/// assert_eq!(cycle.seq, 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleClock {
    cycle_width_secs: u32,
}

impl CycleClock {
    /// Create a new CycleClock
    ///
    /// # Arguments
    /// * `cycle_width_secs` - Width of one cycle; must divide 86,400 exactly
    pub fn new(cycle_width_secs: u32) -> Self {
        assert!(cycle_width_secs > 0, "cycle_width_secs must be positive");
        assert!(
            SECONDS_PER_DAY % cycle_width_secs == 0,
            "cycle_width_secs must evenly divide one day"
        );
        Self { cycle_width_secs }
    }

    pub fn cycle_width_secs(&self) -> u32 {
        self.cycle_width_secs
    }

    /// Number of cycles in one epoch
    pub fn cycles_per_epoch(&self) -> u32 {
        SECONDS_PER_DAY / self.cycle_width_secs
    }

    /// Get the cycle containing `at`
    pub fn locate(&self, at: DateTime<Utc>) -> CycleId {
        let secs_into_day = at.time().num_seconds_from_midnight();
        CycleId {
            epoch: EpochId::containing(at),
            seq: secs_into_day / self.cycle_width_secs + 1,
        }
    }

    /// Instant at which the given cycle opens
    pub fn cycle_start(&self, cycle: CycleId) -> DateTime<Utc> {
        let offset = i64::from(cycle.seq.saturating_sub(1)) * i64::from(self.cycle_width_secs);
        cycle.epoch.start() + Duration::seconds(offset)
    }

    /// Instant at which the given cycle closes (exclusive)
    pub fn cycle_end(&self, cycle: CycleId) -> DateTime<Utc> {
        self.cycle_start(cycle) + Duration::seconds(i64::from(self.cycle_width_secs))
    }

    /// Check if `seq` is a valid cycle number for this clock
    pub fn is_valid_seq(&self, seq: u32) -> bool {
        (1..=self.cycles_per_epoch()).contains(&seq)
    }
}

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Operating system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
