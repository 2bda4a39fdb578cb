//! Default `EmbeddingService` over any provider
//!
//! Splits input into provider-sized requests, bounds each request with a
//! timeout, and degrades every failure to empty vectors.

use super::remote::RemoteEmbeddingProvider;
use super::traits::{EmbeddingProvider, EmbeddingService, EmbeddingStats};
use crate::{EmbeddingError, EmbeddingResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskaudit_config::EmbeddingConfig;
use tokio::sync::RwLock;

/// Default implementation of `EmbeddingService`
///
/// Provider is Arc-shared so one HTTP client serves every caller
pub struct DefaultEmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    stats: Arc<RwLock<EmbeddingStats>>,
    batch_size: usize,
    timeout: Duration,
}

impl DefaultEmbeddingService {
    /// Create a service backed by the remote HTTP provider
    ///
    /// # Errors
    ///
    /// Returns an error if the provider's HTTP client cannot be built
    pub fn new(config: &EmbeddingConfig) -> EmbeddingResult<Self> {
        let provider = Arc::new(RemoteEmbeddingProvider::new(config)?);
        Ok(Self::with_provider(
            provider,
            config.request_batch_size,
            config.timeout(),
        ))
    }

    /// Create with a custom provider
    pub fn with_provider(
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        timeout: Duration,
    ) -> Self {
        let stats = Arc::new(RwLock::new(EmbeddingStats {
            model_name: provider.model_name().to_string(),
            embedding_dimension: provider.embedding_dimension(),
            ..Default::default()
        }));

        Self {
            provider,
            stats,
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    /// One provider request, bounded by the timeout and length-checked
    async fn request(&self, batch: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let embeddings = tokio::time::timeout(self.timeout, self.provider.embed_batch(batch))
            .await
            .map_err(|_| EmbeddingError::Timeout {
                seconds: self.timeout.as_secs(),
            })??;

        if embeddings.len() != batch.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingService for DefaultEmbeddingService {
    #[allow(clippy::cast_precision_loss)]
    async fn generate_embeddings(&self, texts: Vec<&str>) -> Vec<Vec<f32>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let start = Instant::now();

            let (embeddings, failed_request) = match self.request(batch).await {
                Ok(embeddings) => (embeddings, false),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        batch_size = batch.len(),
                        model = self.provider.model_name(),
                        "Embedding request failed, returning empty vectors"
                    );
                    (vec![Vec::new(); batch.len()], true)
                }
            };

            let succeeded = embeddings.iter().filter(|e| !e.is_empty()).count();
            all_embeddings.extend(embeddings);

            let elapsed = start.elapsed().as_millis() as f64;
            let mut stats = self.stats.write().await;
            stats.total_embeddings += succeeded;
            stats.total_failures += batch.len() - succeeded;
            stats.total_batches += 1;
            if failed_request {
                stats.failed_batches += 1;
            }

            let prev_avg = stats.avg_batch_time_ms;
            let count = stats.total_batches as f64;
            stats.avg_batch_time_ms = (prev_avg * (count - 1.0) + elapsed) / count;
        }

        all_embeddings
    }

    fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    async fn get_stats(&self) -> EmbeddingStats {
        self.stats.read().await.clone()
    }
}
