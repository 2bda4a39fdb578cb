//! Taskaudit vector generator
//!
//! Turns record content into embedding vectors through an OpenAI-compatible
//! HTTP provider. Callers get one vector per input, in order; an empty vector
//! marks a failed input.

pub mod embedding;
pub mod error;

pub use embedding::{
    DefaultEmbeddingService, EmbeddingProvider, EmbeddingService, EmbeddingStats,
    RemoteEmbeddingProvider,
};
#[cfg(any(test, feature = "test-utils"))]
pub use embedding::mock::MockEmbeddingProvider;
pub use error::{EmbeddingError, EmbeddingResult};
pub use taskaudit_config::EmbeddingConfig;
