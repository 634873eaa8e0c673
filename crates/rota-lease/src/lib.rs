//! `rota-lease`: durable lock store and lease manager.
//!
//! Mutual exclusion for the whole fleet lives in one SQLite table:
//! `job_leases`, one row per job name. A worker owns a job only while its
//! row carries that worker's id and an unexpired deadline, and every
//! transfer of ownership happens inside a single conditional SQL statement,
//! so two workers can never both believe they hold the same job.
//!
//! [`store::LockStore`] is the low-level contract (usable on its own as a
//! distributed lock), [`manager::LeaseManager`] layers guard-based
//! acquire/release on top of it.

pub mod db;
pub mod error;
pub mod manager;
pub mod store;
pub mod types;

pub use error::{LeaseError, Result};
pub use manager::{LeaseGuard, LeaseManager};
pub use store::{LockStore, SqliteLockStore};
pub use types::{AcquireOutcome, CompletionUpdate, JobLease, RunStatus};
