//! Trait abstractions for embedding generation

use crate::EmbeddingResult;
use async_trait::async_trait;

/// Trait for embedding generation providers
///
/// A provider performs one request for the texts it is given. It may return
/// an empty vector for an individual input it could not embed; any error
/// means the whole request failed.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a batch of texts, one per input, same order
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Get the dimensionality of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/description of the embedding model
    fn model_name(&self) -> &str;
}

/// Service for managing embedding generation
///
/// Coordinates sub-batching and timeouts over a provider and never fails:
/// a failed request degrades to empty vectors for the affected inputs.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// One vector per input; an empty vector signals failure for that input
    async fn generate_embeddings(&self, texts: Vec<&str>) -> Vec<Vec<f32>>;

    /// Get the embedding provider being used
    fn provider(&self) -> &dyn EmbeddingProvider;

    /// Get service statistics
    async fn get_stats(&self) -> EmbeddingStats;
}

/// Statistics about embedding generation
#[derive(Debug, Clone, Default)]
pub struct EmbeddingStats {
    /// Total number of non-empty embeddings generated
    pub total_embeddings: usize,

    /// Inputs that came back empty, including whole failed requests
    pub total_failures: usize,

    /// Total number of provider requests
    pub total_batches: usize,

    /// Provider requests that errored or timed out
    pub failed_batches: usize,

    /// Average batch processing time in milliseconds
    pub avg_batch_time_ms: f64,

    /// Model name being used
    pub model_name: String,

    /// Model dimension
    pub embedding_dimension: usize,
}
