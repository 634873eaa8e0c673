use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WEEKLY_OVERTIME_MINUTES: u32 = 2400; // 40 hours
pub const DEFAULT_DAILY_OVERTIME_MINUTES: u32 = 480; // 8 hours
pub const DEFAULT_DAILY_DOUBLE_MINUTES: u32 = 720; // 12 hours

/// One raw clock-in/clock-out pair inside a pay window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub clock_in: DateTime<Utc>,
    pub clock_out: DateTime<Utc>,
    /// Unpaid break minutes, subtracted from the span before splitting.
    #[serde(default)]
    pub break_minutes: u32,
}

impl TimeEntry {
    pub fn new(clock_in: DateTime<Utc>, clock_out: DateTime<Utc>) -> Self {
        Self {
            clock_in,
            clock_out,
            break_minutes: 0,
        }
    }

    pub fn with_break(mut self, minutes: u32) -> Self {
        self.break_minutes = minutes;
        self
    }
}

/// Jurisdiction rule set deciding how worked minutes split into buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OvertimeRule {
    /// Overtime-exempt subject: every minute is regular.
    Exempt,

    /// Weekly threshold only. Minutes beyond `weekly_overtime_after` are
    /// overtime; with `weekly_double_after` set, minutes beyond it are
    /// reclassified again as double-time.
    FederalWeekly {
        #[serde(default = "default_weekly_overtime")]
        weekly_overtime_after: u32,
        #[serde(default)]
        weekly_double_after: Option<u32>,
    },

    /// Daily bands evaluated first (regular up to `daily_overtime_after`,
    /// overtime up to `daily_double_after`, double-time beyond), then the
    /// summed per-day regular minutes are re-checked against the weekly
    /// threshold and any excess is reclassified as overtime.
    CaliforniaHybrid {
        #[serde(default = "default_daily_overtime")]
        daily_overtime_after: u32,
        #[serde(default = "default_daily_double")]
        daily_double_after: u32,
        #[serde(default = "default_weekly_overtime")]
        weekly_overtime_after: u32,
    },
}

impl OvertimeRule {
    /// The federal rule at its default 40-hour threshold, no double-time.
    pub fn federal() -> Self {
        OvertimeRule::FederalWeekly {
            weekly_overtime_after: DEFAULT_WEEKLY_OVERTIME_MINUTES,
            weekly_double_after: None,
        }
    }

    /// The California hybrid rule at its default 8/12-hour daily bands and
    /// 40-hour weekly threshold.
    pub fn california() -> Self {
        OvertimeRule::CaliforniaHybrid {
            daily_overtime_after: DEFAULT_DAILY_OVERTIME_MINUTES,
            daily_double_after: DEFAULT_DAILY_DOUBLE_MINUTES,
            weekly_overtime_after: DEFAULT_WEEKLY_OVERTIME_MINUTES,
        }
    }
}

fn default_weekly_overtime() -> u32 {
    DEFAULT_WEEKLY_OVERTIME_MINUTES
}
fn default_daily_overtime() -> u32 {
    DEFAULT_DAILY_OVERTIME_MINUTES
}
fn default_daily_double() -> u32 {
    DEFAULT_DAILY_DOUBLE_MINUTES
}

/// Minutes partitioned into pay buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinuteSplit {
    pub regular: i64,
    pub overtime: i64,
    pub double_time: i64,
}

impl MinuteSplit {
    pub fn all_regular(minutes: i64) -> Self {
        Self {
            regular: minutes,
            overtime: 0,
            double_time: 0,
        }
    }

    pub fn total(&self) -> i64 {
        self.regular + self.overtime + self.double_time
    }
}

/// The window-level partition plus each entry's share of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowAggregate {
    pub window: MinuteSplit,
    /// One split per input entry, in input order. Each bucket's per-entry
    /// shares sum exactly to the window bucket.
    pub entries: Vec<MinuteSplit>,
}

impl WindowAggregate {
    pub fn total_minutes(&self) -> i64 {
        self.window.total()
    }
}
