use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rota_core::config::DEFAULT_LEASE_SECS;
use rota_core::{JobName, Schedule, WorkerId};
use rota_lease::RunStatus;

/// Error a job body reports back to the executor.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    pub fn msg(msg: impl Into<String>) -> Self {
        JobError::Failed(msg.into())
    }
}

/// The runtime context passed into every job execution.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_name: JobName,
    pub worker_id: WorkerId,
    /// Claim time of this run, the tick instant that won the window.
    pub started_at: DateTime<Utc>,
}

/// Async job body.
///
/// Implementations must tolerate being dropped mid-run: the executor
/// cancels the body when its lease is lost, and whatever side effects
/// already happened must be safe to re-attempt in a later window.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}

/// What happens when a job fires while a previous run is still active.
///
/// Only `SkipIfRunning` is runnable here; the other variants exist so a
/// config that asks for them is rejected at registration instead of being
/// silently reinterpreted as a skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlapPolicy {
    SkipIfRunning,
    Queue,
    RunInBackground,
}

impl std::fmt::Display for OverlapPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OverlapPolicy::SkipIfRunning => "skip-if-running",
            OverlapPolicy::Queue => "queue",
            OverlapPolicy::RunInBackground => "run-in-background",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip-if-running" => Ok(OverlapPolicy::SkipIfRunning),
            "queue" => Ok(OverlapPolicy::Queue),
            "run-in-background" => Ok(OverlapPolicy::RunInBackground),
            _ => Err(format!("Unknown overlap policy: {s}")),
        }
    }
}

/// A registered job binding a name, schedule, lease duration and handler.
#[derive(Clone)]
pub struct JobDefinition {
    pub name: JobName,
    pub schedule: Schedule,
    /// Wrapped in Arc so definitions can be cloned into executor tasks.
    pub handler: Arc<dyn JobHandler>,
    /// How long one claim lasts before other workers may reclaim the job.
    pub lease: Duration,
    /// Disabled jobs keep their lease row current but are never claimed.
    pub enabled: bool,
    pub overlap: OverlapPolicy,
}

impl JobDefinition {
    pub fn new(name: JobName, schedule: Schedule, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            name,
            schedule,
            handler,
            lease: Duration::seconds(DEFAULT_LEASE_SECS as i64),
            enabled: true,
            overlap: OverlapPolicy::SkipIfRunning,
        }
    }

    pub fn with_lease_secs(mut self, secs: u64) -> Self {
        self.lease = Duration::seconds(secs as i64);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }
}

/// One row of the `job_runs` history table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// UUID v4 string, primary key.
    pub id: String,
    pub job_name: JobName,
    pub worker_id: WorkerId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub error: Option<String>,
    pub duration_ms: i64,
}

/// Why a job was passed over during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The window hasn't opened yet.
    NotDue,
    /// Another worker holds a live lease.
    Held,
    /// Disabled in this worker's registration.
    Disabled,
    /// The row vanished between registration and claim.
    Unregistered,
    /// The store errored; treated as "not acquired".
    StoreError,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::NotDue => "not_due",
            SkipReason::Held => "held",
            SkipReason::Disabled => "disabled",
            SkipReason::Unregistered => "unregistered",
            SkipReason::StoreError => "store_error",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedJob {
    pub job_name: JobName,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub job_name: JobName,
    pub status: RunStatus,
    pub duration_ms: i64,
}

/// What one scheduling pass did.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub ran: Vec<RunSummary>,
    pub skipped: Vec<SkippedJob>,
}

impl TickReport {
    pub fn ran_job(&self, name: &JobName) -> bool {
        self.ran.iter().any(|r| &r.job_name == name)
    }

    pub fn skip_reason(&self, name: &JobName) -> Option<SkipReason> {
        self.skipped
            .iter()
            .find(|s| &s.job_name == name)
            .map(|s| s.reason)
    }
}
