//! OpenAI-compatible HTTP embedding provider
//!
//! Posts `{"model", "input": [..]}` to `{provider_url}/embeddings` and reads
//! `{"data": [{"index", "embedding"}]}` back. Inputs the provider leaves out
//! of `data` come back as empty vectors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::traits::EmbeddingProvider;
use crate::{EmbeddingError, EmbeddingResult};
use taskaudit_config::EmbeddingConfig;

/// Longest provider error body kept in an error message
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Remote provider speaking the `/embeddings` API
pub struct RemoteEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    timeout_seconds: u64,
}

impl RemoteEmbeddingProvider {
    /// Build a provider from configuration
    ///
    /// # Errors
    ///
    /// Returns `EmbeddingError::Config` if the HTTP client cannot be built
    pub fn new(config: &EmbeddingConfig) -> EmbeddingResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_seconds.min(10)))
            .timeout(config.timeout())
            .build()
            .map_err(|e| EmbeddingError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.provider_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            dimension: config.dimensions,
            timeout_seconds: config.timeout_seconds,
        })
    }

    /// Full URL requests are sent to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout {
                    seconds: self.timeout_seconds,
                }
            } else {
                EmbeddingError::from(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Provider {
                status: status.as_u16(),
                message: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let parsed: EmbeddingResponse = response.json().await?;

        let mut embeddings = vec![Vec::new(); texts.len()];
        for datum in parsed.data {
            match embeddings.get_mut(datum.index) {
                Some(slot) => *slot = datum.embedding,
                None => tracing::warn!(
                    index = datum.index,
                    inputs = texts.len(),
                    "Provider returned an embedding for an unknown input index"
                ),
            }
        }

        Ok(embeddings)
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> EmbeddingConfig {
        EmbeddingConfig {
            provider_url: format!("{}/v1/", server.uri()),
            model: "test-model".to_string(),
            api_key: Some("sk-test".to_string()),
            dimensions: 3,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_embeddings_are_placed_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0, 0.0] },
                    { "index": 0, "embedding": [1.0, 0.0, 0.0] }
                ]
            })))
            .mount(&server)
            .await;

        let provider = RemoteEmbeddingProvider::new(&config_for(&server)).unwrap();
        let embeddings = provider.embed_batch(&["first", "second"]).await.unwrap();

        assert_eq!(embeddings, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    }

    #[tokio::test]
    async fn test_missing_index_yields_empty_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [ { "index": 0, "embedding": [0.5, 0.5, 0.5] } ]
            })))
            .mount(&server)
            .await;

        let provider = RemoteEmbeddingProvider::new(&config_for(&server)).unwrap();
        let embeddings = provider.embed_batch(&["ok", "dropped"]).await.unwrap();

        assert_eq!(embeddings.len(), 2);
        assert!(!embeddings[0].is_empty());
        assert!(embeddings[1].is_empty());
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = RemoteEmbeddingProvider::new(&config_for(&server)).unwrap();
        let result = provider.embed_batch(&["text"]).await;

        assert!(matches!(
            result,
            Err(EmbeddingError::Provider { status: 503, ref message }) if message == "overloaded"
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let provider = RemoteEmbeddingProvider::new(&config_for(&server)).unwrap();
        let result = provider.embed_batch(&["text"]).await;

        assert!(matches!(result, Err(EmbeddingError::InvalidResponse(_))));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = EmbeddingConfig {
            provider_url: "http://localhost:9000/v1/".to_string(),
            ..EmbeddingConfig::default()
        };
        let provider = RemoteEmbeddingProvider::new(&config).unwrap();
        assert_eq!(provider.endpoint(), "http://localhost:9000/v1/embeddings");
    }
}
