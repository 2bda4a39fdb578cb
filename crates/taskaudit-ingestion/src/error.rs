//! Error types for the ingestion pipeline
//!
//! Row-level problems never show up here; they are tallied as skip reasons.
//! An `IngestionError` reaching the scheduler is job-fatal and its `Display`
//! text becomes the job's error message.

use taskaudit_meta_data::DatabaseError;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for ingestion operations
pub type IngestionResult<T> = Result<T, IngestionError>;

#[derive(Error, Debug)]
pub enum IngestionError {
    /// Payload text could not be turned into rows
    #[error("Failed to parse {format} payload: {message}")]
    PayloadParse {
        format: &'static str,
        message: String,
    },

    #[error("Payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: u64, max: u64 },

    /// Fetching rows from a remote endpoint failed
    #[error("Endpoint {url} failed: {message}")]
    Endpoint { url: String, message: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Job {job_id} not found")]
    JobNotFound { job_id: Uuid },

    #[error("Job {job_id} is already completed and cannot be cancelled")]
    AlreadyCompleted { job_id: Uuid },

    #[error("Job {job_id} is still {status} and cannot be deleted")]
    JobActive { job_id: Uuid, status: String },

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl IngestionError {
    pub fn payload_parse(format: &'static str, message: impl Into<String>) -> Self {
        Self::PayloadParse {
            format,
            message: message.into(),
        }
    }

    pub fn endpoint(url: &str, message: impl Into<String>) -> Self {
        Self::Endpoint {
            url: url.to_string(),
            message: message.into(),
        }
    }
}
