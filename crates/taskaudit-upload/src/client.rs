//! Chunked upload client
//!
//! Payloads up to the threshold go out in one request. Larger ones are cut
//! into fixed-size chunks sent in index order under a fresh session id, then
//! a `complete` call asks the server to assemble and enqueue them. Every
//! request is retried with linear backoff, except on 4xx answers which abort
//! the whole upload at once.

use bytes::Bytes;
use std::path::Path;
use std::time::Duration;
use taskaudit_config::UploadConfig;
use uuid::Uuid;

use crate::error::{UploadError, UploadResult};
use crate::protocol::{
    CompleteRequest, SINGLE_UPLOAD_PATH, SingleUploadRequest, UploadMetadata, UploadReceipt,
    chunk_path, complete_path,
};

/// Longest server error body kept in an error message
const MAX_ERROR_BODY_CHARS: usize = 512;

pub struct ChunkedUploader {
    client: reqwest::Client,
    base_url: String,
    chunk_size: usize,
    threshold: u64,
    max_attempts: u32,
    retry_base_delay: Duration,
}

impl ChunkedUploader {
    /// # Errors
    ///
    /// Returns `UploadError::Configuration` if the HTTP client cannot be
    /// built or the chunk size does not fit in memory
    pub fn new(config: &UploadConfig) -> UploadResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| UploadError::Configuration(format!("Failed to create HTTP client: {e}")))?;
        let chunk_size = usize::try_from(config.chunk_size_bytes.max(1))
            .map_err(|e| UploadError::Configuration(format!("Invalid chunk size: {e}")))?;

        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            chunk_size,
            threshold: config.chunked_threshold_bytes,
            max_attempts: config.max_attempts.max(1),
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        })
    }

    /// Read a file and upload it
    ///
    /// # Errors
    ///
    /// Returns `UploadError::Io` if the file cannot be read, otherwise the
    /// errors of [`Self::upload`]
    pub async fn upload_file(
        &self,
        path: &Path,
        metadata: &UploadMetadata,
    ) -> UploadResult<UploadReceipt> {
        let payload = Bytes::from(tokio::fs::read(path).await?);
        tracing::info!(path = %path.display(), bytes = payload.len(), "Uploading file");
        self.upload(payload, metadata).await
    }

    /// Upload a payload, chunking it when above the threshold
    ///
    /// # Errors
    ///
    /// Returns `Rejected` on a 4xx answer, `RetriesExhausted` when a request
    /// keeps failing, or `InvalidResponse` for an unreadable receipt
    pub async fn upload(
        &self,
        payload: Bytes,
        metadata: &UploadMetadata,
    ) -> UploadResult<UploadReceipt> {
        if payload.len() as u64 <= self.threshold {
            self.upload_single(&payload, metadata).await
        } else {
            self.upload_chunked(&payload, metadata).await
        }
    }

    async fn upload_single(
        &self,
        payload: &Bytes,
        metadata: &UploadMetadata,
    ) -> UploadResult<UploadReceipt> {
        let content = std::str::from_utf8(payload)
            .map_err(|e| UploadError::InvalidUtf8(e.to_string()))?
            .to_string();
        let request = SingleUploadRequest {
            metadata: metadata.clone(),
            content,
        };
        let url = format!("{}{SINGLE_UPLOAD_PATH}", self.base_url);

        let response = self
            .send_with_retry("upload", || self.client.post(&url).json(&request))
            .await?;
        read_receipt(response).await
    }

    async fn upload_chunked(
        &self,
        payload: &Bytes,
        metadata: &UploadMetadata,
    ) -> UploadResult<UploadReceipt> {
        let session_id = Uuid::new_v4().to_string();
        let mut total_chunks = 0u32;

        tracing::info!(
            %session_id,
            bytes = payload.len(),
            chunk_size = self.chunk_size,
            "Starting chunked upload"
        );

        let mut start = 0usize;
        while start < payload.len() {
            let end = start.saturating_add(self.chunk_size).min(payload.len());
            let chunk = payload.slice(start..end);
            let index = total_chunks;
            let url = format!("{}{}", self.base_url, chunk_path(&session_id, index));

            self.send_with_retry(&format!("chunk {index}"), || {
                self.client
                    .put(&url)
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(chunk.clone())
            })
            .await?;

            tracing::debug!(%session_id, index, bytes = chunk.len(), "Chunk uploaded");
            total_chunks = total_chunks.saturating_add(1);
            start = end;
        }

        let request = CompleteRequest {
            metadata: metadata.clone(),
            total_chunks,
        };
        let url = format!("{}{}", self.base_url, complete_path(&session_id));
        let response = self
            .send_with_retry("complete", || self.client.post(&url).json(&request))
            .await?;

        tracing::info!(%session_id, total_chunks, "Chunked upload complete");
        read_receipt(response).await
    }

    /// Send until success, a 4xx, or the attempt budget runs out
    async fn send_with_retry<F>(&self, step: &str, build: F) -> UploadResult<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            attempt = attempt.saturating_add(1);

            let failure = match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status().is_client_error() => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    tracing::error!(step, status, "Upload rejected, not retrying");
                    return Err(UploadError::Rejected {
                        status,
                        message: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
                    });
                }
                Ok(response) => format!("HTTP {}", response.status().as_u16()),
                Err(e) => e.to_string(),
            };

            if attempt >= self.max_attempts {
                return Err(UploadError::RetriesExhausted {
                    step: step.to_string(),
                    attempts: attempt,
                    message: failure,
                });
            }

            let delay = self.retry_base_delay.saturating_mul(attempt);
            tracing::warn!(
                step,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis(),
                error = %failure,
                "Upload request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

async fn read_receipt(response: reqwest::Response) -> UploadResult<UploadReceipt> {
    response
        .json::<UploadReceipt>()
        .await
        .map_err(|e| UploadError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::PayloadFormat;
    use taskaudit_meta_data::RecordType;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn uploader(server: &MockServer, chunk: u64, threshold: u64) -> ChunkedUploader {
        ChunkedUploader::new(&UploadConfig {
            server_url: format!("{}/", server.uri()),
            chunk_size_bytes: chunk,
            chunked_threshold_bytes: threshold,
            max_attempts: 3,
            retry_base_delay_ms: 1,
            ..UploadConfig::default()
        })
        .unwrap()
    }

    fn metadata() -> UploadMetadata {
        UploadMetadata {
            project_id: "p".to_string(),
            record_type: RecordType::Task,
            format: PayloadFormat::Csv,
            source: None,
            keywords: Vec::new(),
            generate_embeddings: false,
        }
    }

    fn receipt(job_id: Uuid) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "job_id": job_id }))
    }

    #[tokio::test]
    async fn test_small_payload_uses_single_request() {
        let server = MockServer::start().await;
        let job_id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/uploads"))
            .respond_with(receipt(job_id))
            .expect(1)
            .mount(&server)
            .await;

        let result = uploader(&server, 4, 64)
            .upload(Bytes::from_static(b"id,content\n"), &metadata())
            .await
            .unwrap();

        assert_eq!(result.job_id, job_id);
        let requests = server.received_requests().await.unwrap();
        let body: SingleUploadRequest = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body.content, "id,content\n");
        assert_eq!(body.metadata, metadata());
    }

    #[tokio::test]
    async fn test_large_payload_is_sent_in_ordered_chunks() {
        let server = MockServer::start().await;
        let job_id = Uuid::new_v4();
        Mock::given(method("PUT"))
            .and(path_regex(r"^/uploads/[0-9a-f-]+/chunks/\d+$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/uploads/[0-9a-f-]+/complete$"))
            .respond_with(receipt(job_id))
            .expect(1)
            .mount(&server)
            .await;

        let result = uploader(&server, 4, 5)
            .upload(Bytes::from_static(b"0123456789"), &metadata())
            .await
            .unwrap();
        assert_eq!(result.job_id, job_id);

        let requests = server.received_requests().await.unwrap();
        let chunks: Vec<(String, Vec<u8>)> = requests
            .iter()
            .filter(|r| r.method.as_str() == "PUT")
            .map(|r| (r.url.path().to_string(), r.body.clone()))
            .collect();
        assert!(chunks[0].0.ends_with("/chunks/0"));
        assert!(chunks[2].0.ends_with("/chunks/2"));
        let joined: Vec<u8> = chunks.iter().flat_map(|(_, body)| body.clone()).collect();
        assert_eq!(joined, b"0123456789");

        let complete = requests.last().unwrap();
        let body: CompleteRequest = serde_json::from_slice(&complete.body).unwrap();
        assert_eq!(body.total_chunks, 3);
    }

    #[tokio::test]
    async fn test_transient_chunk_failure_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(receipt(Uuid::new_v4()))
            .mount(&server)
            .await;

        let result = uploader(&server, 4, 1)
            .upload(Bytes::from_static(b"abcdef"), &metadata())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_client_error_aborts_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(413).set_body_string("too big"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(receipt(Uuid::new_v4()))
            .expect(0)
            .mount(&server)
            .await;

        let result = uploader(&server, 4, 1)
            .upload(Bytes::from_static(b"abcdefgh"), &metadata())
            .await;

        assert!(matches!(
            result,
            Err(UploadError::Rejected { status: 413, ref message }) if message == "too big"
        ));
    }

    #[tokio::test]
    async fn test_persistent_server_error_exhausts_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let result = uploader(&server, 4, 1)
            .upload(Bytes::from_static(b"abcdefgh"), &metadata())
            .await;

        match result {
            Err(UploadError::RetriesExhausted { step, attempts, .. }) => {
                assert_eq!(step, "chunk 0");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_file_reads_from_disk() {
        let server = MockServer::start().await;
        let job_id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/uploads"))
            .respond_with(receipt(job_id))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("rows.csv");
        std::fs::write(&file, "id,content\n1,hello\n").unwrap();

        let result = uploader(&server, 4, 1024)
            .upload_file(&file, &metadata())
            .await
            .unwrap();
        assert_eq!(result.job_id, job_id);
    }
}
