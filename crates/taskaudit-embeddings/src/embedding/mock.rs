//! Scriptable provider for tests

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::traits::EmbeddingProvider;
use crate::{EmbeddingError, EmbeddingResult};

/// Mock provider returning constant vectors
///
/// Can fail whole requests, fail individual inputs containing a marker,
/// answer slowly, or return one vector too few.
#[derive(Clone)]
pub struct MockEmbeddingProvider {
    dimension: usize,
    fail: bool,
    failing_marker: Option<String>,
    delay: Option<Duration>,
    drop_last: bool,
    calls: Arc<AtomicUsize>,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail: false,
            failing_marker: None,
            delay: None,
            drop_last: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every request errors
    #[must_use]
    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Inputs containing `marker` come back empty
    #[must_use]
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.failing_marker = Some(marker.to_string());
        self
    }

    /// Sleep before answering
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Return one vector fewer than requested
    #[must_use]
    pub const fn dropping_last(mut self) -> Self {
        self.drop_last = true;
        self
    }

    /// Number of `embed_batch` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(EmbeddingError::Other("Mock embedding failure".into()));
        }

        let mut embeddings: Vec<Vec<f32>> = texts
            .iter()
            .map(|text| match &self.failing_marker {
                Some(marker) if text.contains(marker.as_str()) => Vec::new(),
                _ => vec![0.1; self.dimension],
            })
            .collect();
        if self.drop_last {
            embeddings.pop();
        }
        Ok(embeddings)
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embedding-model"
    }
}
