use common::OptionsError;
use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqError {
    /// The store backing the queue could not be reached or rejected the write.
    #[error("Queue unavailable: {0}")]
    Unavailable(#[from] DbErr),

    #[error("Invalid job options: {0}")]
    InvalidOptions(#[from] OptionsError),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
