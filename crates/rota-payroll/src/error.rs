use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while aggregating a pay window.
#[derive(Debug, Error)]
pub enum PayrollError {
    /// An entry ends before it starts.
    #[error("Entry {index}: clock-out {clock_out} precedes clock-in {clock_in}")]
    NegativeSpan {
        index: usize,
        clock_in: DateTime<Utc>,
        clock_out: DateTime<Utc>,
    },

    /// An entry's break is longer than the entry itself.
    #[error("Entry {index}: {break_minutes} break minutes exceed the {span_minutes} minute span")]
    BreakExceedsSpan {
        index: usize,
        break_minutes: u32,
        span_minutes: i64,
    },
}

pub type Result<T> = std::result::Result<T, PayrollError>;
