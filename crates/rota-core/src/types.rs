use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::CoreError;

/// Maximum accepted length for a job name.
const MAX_JOB_NAME_LEN: usize = 128;

/// Unique name of a coordinated job (e.g. "recurring-invoices-daily").
///
/// The name is the primary key of the lease table and appears in every log
/// line, so it is validated once at construction: non-empty, at most 128
/// characters, drawn from `[A-Za-z0-9._-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobName(String);

impl JobName {
    pub fn new(name: &str) -> Result<Self, CoreError> {
        if name.is_empty() {
            return Err(CoreError::InvalidJobName("name is empty".to_string()));
        }
        if name.len() > MAX_JOB_NAME_LEN {
            return Err(CoreError::InvalidJobName(format!(
                "name exceeds {} characters",
                MAX_JOB_NAME_LEN
            )));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(CoreError::InvalidJobName(format!(
                "invalid character {:?} in {:?}",
                bad, name
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identity of one worker process holding (or requesting) leases.
///
/// Format: `{host}-{pid}-{suffix}`, readable in logs and in the lease
/// table, unique per process thanks to the random suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    /// Derive an identity for the current process.
    pub fn generate() -> Self {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}-{}", host, std::process::id(), &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Epoch milliseconds, the timestamp representation used in SQL. Integer
/// comparison in the database then matches chrono comparison here.
pub fn epoch_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Inverse of [`epoch_ms`]; saturates to the minimum instant on
/// out-of-range input.
pub fn from_epoch_ms(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Defines when and how often a job should run.
///
/// Serialized as tagged JSON both in configuration and in the lease table's
/// `schedule` column, so a stored row is always self-describing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Run exactly once at the given UTC instant.
    Once { at: DateTime<Utc> },

    /// Run repeatedly with a fixed interval in seconds.
    Interval { every_secs: u64 },

    /// Run every day at the given hour and minute (UTC).
    Daily { hour: u8, minute: u8 },

    /// Run on a specific weekday (0 = Monday … 6 = Sunday) at the given time (UTC).
    Weekly { day: u8, hour: u8, minute: u8 },

    /// Run according to a cron expression (standard five/six column syntax).
    Cron { expression: String },
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Once { at } => write!(f, "once at {}", at.format("%Y-%m-%d %H:%M UTC")),
            Schedule::Interval { every_secs } => write!(f, "every {every_secs}s"),
            Schedule::Daily { hour, minute } => write!(f, "daily at {hour:02}:{minute:02} UTC"),
            Schedule::Weekly { day, hour, minute } => {
                let day = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"]
                    .get(*day as usize)
                    .copied()
                    .unwrap_or("?");
                write!(f, "weekly on {day} at {hour:02}:{minute:02} UTC")
            }
            Schedule::Cron { expression } => write!(f, "cron {expression}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_name_accepts_typical_names() {
        for name in [
            "recurring-invoices-daily",
            "stripe.sync",
            "trial_expiry_check",
            "a",
        ] {
            assert!(JobName::new(name).is_ok(), "rejected {:?}", name);
        }
    }

    #[test]
    fn job_name_rejects_empty() {
        assert!(JobName::new("").is_err());
    }

    #[test]
    fn job_name_rejects_invalid_characters() {
        assert!(JobName::new("has space").is_err());
        assert!(JobName::new("slash/name").is_err());
        assert!(JobName::new("emoji✨").is_err());
    }

    #[test]
    fn job_name_rejects_overlong() {
        let long = "x".repeat(129);
        assert!(JobName::new(&long).is_err());
    }

    #[test]
    fn worker_id_contains_pid() {
        let id = WorkerId::generate();
        assert!(id.as_str().contains(&std::process::id().to_string()));
    }

    #[test]
    fn worker_ids_are_unique_per_call() {
        assert_ne!(WorkerId::generate(), WorkerId::generate());
    }

    #[test]
    fn schedule_round_trips_through_json() {
        let sched = Schedule::Daily { hour: 0, minute: 30 };
        let json = serde_json::to_string(&sched).unwrap();
        assert!(json.contains(r#""kind":"daily""#));
        let back: Schedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sched);
    }

    #[test]
    fn cron_schedule_round_trips_through_json() {
        let sched = Schedule::Cron {
            expression: "0 30 0 * * *".to_string(),
        };
        let json = serde_json::to_string(&sched).unwrap();
        let back: Schedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sched);
    }

    #[test]
    fn schedule_display_is_operator_readable() {
        let daily = Schedule::Daily { hour: 0, minute: 30 };
        assert_eq!(daily.to_string(), "daily at 00:30 UTC");

        let weekly = Schedule::Weekly {
            day: 4,
            hour: 17,
            minute: 0,
        };
        assert_eq!(weekly.to_string(), "weekly on fri at 17:00 UTC");

        let interval = Schedule::Interval { every_secs: 3600 };
        assert_eq!(interval.to_string(), "every 3600s");
    }
}
