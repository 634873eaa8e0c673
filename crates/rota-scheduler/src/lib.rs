//! `rota-scheduler`: recurrence evaluation and the coordinated engine.
//!
//! A [`SchedulerEngine`] holds this worker's job registrations and, on every
//! external tick, offers each job to the shared lock store. Claims, due-ness
//! and exclusion are all settled by the store's conditional SQL, so any
//! number of engines can tick against the same database and each window
//! still fires at most once.
//!
//! Recurrence math lives in [`recurrence`]: next-occurrence computation for
//! every [`rota_core::Schedule`] kind and the advance-past-finish rule that
//! skips (and counts) windows a long run or an outage passed over.

pub mod command;
pub mod db;
pub mod engine;
pub mod error;
mod executor;
pub mod recurrence;
pub mod registry;
pub mod types;

pub use command::CommandJob;
pub use db::RunHistory;
pub use engine::{EngineSettings, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use registry::JobRegistry;
pub use types::{
    JobContext, JobDefinition, JobError, JobHandler, OverlapPolicy, RunRecord, RunSummary,
    SkipReason, SkippedJob, TickReport,
};
