//! `rota-core`: shared vocabulary for the Rota workspace.
//!
//! Holds the types every other crate speaks: validated job names, worker
//! identity, schedule definitions, and the figment-backed configuration
//! loaded by the `rotad` binary.

pub mod config;
pub mod error;
pub mod types;

pub use config::RotaConfig;
pub use error::{CoreError, Result};
pub use types::{epoch_ms, from_epoch_ms, JobName, Schedule, WorkerId};
