use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rota_core::{JobName, Schedule, WorkerId};

/// Outcome of the most recent run recorded on a lease row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Registered, never claimed yet.
    Pending,
    /// A worker currently holds the lease.
    Running,
    /// Last run completed without error.
    Success,
    /// Last run returned an error.
    Failure,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failure" => Ok(RunStatus::Failure),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// One row of the `job_leases` table.
///
/// `owner_id` plus an unexpired `expires_at` means a worker holds the job
/// right now. `next_due_at` is the persisted window marker: the job is due
/// whenever `next_due_at <= now`, and the marker only advances when a run
/// completes, so a window fires at most once no matter how ticks land.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLease {
    pub job_name: JobName,
    /// Schedule as registered, NULL for plain locks taken outside the scheduler.
    pub schedule: Option<Schedule>,
    pub owner_id: Option<WorkerId>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub next_due_at: Option<DateTime<Utc>>,
    /// Completion time of the last successful run.
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: RunStatus,
    pub last_error: Option<String>,
    pub last_duration_ms: Option<i64>,
    pub run_count: i64,
    /// Windows that passed entirely while no worker ran the job.
    pub missed_windows: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobLease {
    /// True while some worker's claim on this job is still live.
    pub fn is_held(&self, now: DateTime<Utc>) -> bool {
        self.owner_id.is_some() && self.expires_at.map(|e| e > now).unwrap_or(false)
    }

    /// True once the current window has opened.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_due_at.map(|d| d <= now).unwrap_or(false)
    }
}

/// Result of one claim attempt.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    /// This worker now holds the job until `expires_at`.
    Acquired { expires_at: DateTime<Utc> },
    /// Another worker's lease is still live.
    Held {
        owner_id: WorkerId,
        expires_at: Option<DateTime<Utc>>,
    },
    /// The window hasn't opened yet (`None` means no further window exists).
    NotDue { next_due_at: Option<DateTime<Utc>> },
    /// No row for this job name.
    Unregistered,
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired { .. })
    }
}

/// Everything a finishing run writes back to its lease row in one statement.
#[derive(Debug, Clone)]
pub struct CompletionUpdate {
    pub status: RunStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Next window, `None` when the schedule is exhausted (Once jobs).
    pub next_due_at: Option<DateTime<Utc>>,
    /// Whole windows skipped over between the claimed one and `next_due_at`.
    pub missed_windows: u32,
}

impl CompletionUpdate {
    pub fn success(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        next_due_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            status: RunStatus::Success,
            error: None,
            started_at,
            finished_at,
            next_due_at,
            missed_windows: 0,
        }
    }

    pub fn failure(
        error: impl Into<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        next_due_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            status: RunStatus::Failure,
            error: Some(error.into()),
            started_at,
            finished_at,
            next_due_at,
            missed_windows: 0,
        }
    }

    pub fn with_missed_windows(mut self, missed: u32) -> Self {
        self.missed_windows = missed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn lease_at(next_due: Option<DateTime<Utc>>) -> JobLease {
        JobLease {
            job_name: JobName::new("test-job").unwrap(),
            schedule: None,
            owner_id: None,
            acquired_at: None,
            expires_at: None,
            next_due_at: next_due,
            last_run_at: None,
            last_status: RunStatus::Pending,
            last_error: None,
            last_duration_ms: None,
            run_count: 0,
            missed_windows: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn run_status_round_trips_through_strings() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Failure,
        ] {
            let parsed: RunStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("cancelled".parse::<RunStatus>().is_err());
    }

    #[test]
    fn due_iff_marker_passed() {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 0, 30, 0).unwrap();
        let lease = lease_at(Some(t));
        assert!(!lease.is_due(t - chrono::Duration::seconds(1)));
        assert!(lease.is_due(t));
        assert!(lease.is_due(t + chrono::Duration::hours(5)));
        assert!(!lease_at(None).is_due(t));
    }

    #[test]
    fn held_requires_live_expiry() {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut lease = lease_at(None);
        assert!(!lease.is_held(t));
        lease.owner_id = Some(WorkerId::from("worker-a"));
        lease.expires_at = Some(t + chrono::Duration::minutes(10));
        assert!(lease.is_held(t));
        assert!(!lease.is_held(t + chrono::Duration::minutes(10)));
    }
}
