use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The provided schedule definition is invalid or unsupported.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The provided job definition is malformed (e.g. empty command).
    #[error("Invalid job definition: {0}")]
    InvalidJob(String),

    /// A job with this name is already registered on the engine.
    #[error("Duplicate job: {name}")]
    DuplicateJob { name: String },

    /// The job declares an overlap policy other than skip-if-running.
    #[error("Unsupported overlap policy for job {name}: {policy}")]
    UnsupportedOverlap { name: String, policy: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
