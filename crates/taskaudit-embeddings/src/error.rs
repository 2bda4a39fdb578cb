//! Error types for the taskaudit-embeddings crate

use thiserror::Error;

/// Result type alias for embedding operations
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Errors raised by embedding providers
///
/// The service layer never surfaces these to the pipeline; they are logged
/// and turned into empty vectors so retry accounting stays per record.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Transport failure talking to the provider
    #[error("Network error: {0}")]
    Network(String),

    /// Provider answered with a non-success status
    #[error("Provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },

    /// Response body did not match the expected shape
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// Request exceeded the configured timeout
    #[error("Embedding request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Configuration and environment errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error for other cases
    #[error("Other error: {0}")]
    Other(String),
}

impl EmbeddingError {
    /// Create a configuration error
    pub fn config_error(msg: &str) -> Self {
        Self::Config(msg.to_string())
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}
