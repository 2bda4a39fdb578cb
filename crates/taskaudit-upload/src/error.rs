//! Error types for chunked transfer

use thiserror::Error;

/// Result type alias for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

#[derive(Error, Debug)]
pub enum UploadError {
    /// Server refused a request with a client error; never retried
    #[error("Upload rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    /// A request kept failing after every attempt
    #[error("{step} failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        step: String,
        attempts: u32,
        message: String,
    },

    #[error("Invalid server response: {0}")]
    InvalidResponse(String),

    #[error("Upload session {session_id} not found")]
    UnknownSession { session_id: String },

    #[error("Too many open upload sessions (limit {max})")]
    TooManySessions { max: usize },

    #[error("Upload session {session_id} exceeds {max} bytes")]
    SessionTooLarge { session_id: String, max: u64 },

    #[error("Upload session {session_id} is missing chunks {missing:?}")]
    MissingChunks {
        session_id: String,
        missing: Vec<u32>,
    },

    #[error("Chunk {index} is outside the declared {total} chunks")]
    UnexpectedChunk { index: u32, total: u32 },

    #[error("Uploaded payload is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}
