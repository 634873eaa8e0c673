use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LeaseError>;
