//! `rota-payroll`: time-window overtime aggregation.
//!
//! Splits the worked minutes of one pay window into regular, overtime and
//! double-time buckets under a jurisdiction rule, then distributes the
//! window buckets back onto the individual entries in proportion to their
//! worked minutes. Aggregation is a pure function of its inputs: nothing is
//! stored, and recomputing over the same entries yields identical buckets.

pub mod error;
pub mod overtime;
pub mod types;

pub use error::{PayrollError, Result};
pub use overtime::aggregate;
pub use types::{MinuteSplit, OvertimeRule, TimeEntry, WindowAggregate};
