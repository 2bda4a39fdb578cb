//! Vectorizer (Phase 2)
//!
//! Scans a whole partition for records still waiting for an embedding, so
//! leftovers from earlier failed or cancelled jobs are picked up too. Each
//! record gets a bounded number of attempts per run; exhausted records are
//! marked permanently failed and excluded, which guarantees the scan ends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use taskaudit_config::IngestionConfig;
use taskaudit_embeddings::EmbeddingService;
use taskaudit_meta_data::{EmbeddingCandidate, JobRepository, RecordRepository};
use uuid::Uuid;

use crate::cancellation::{Checkpoint, JobCancellation};
use crate::error::IngestionResult;
use crate::store::PipelineStore;

/// Vectorizer tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorizerConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    /// Pause after a batch with zero successes
    pub empty_batch_backoff: Duration,
}

impl From<&IngestionConfig> for VectorizerConfig {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            batch_size: config.vector_batch_size,
            max_retries: config.max_embedding_retries,
            empty_batch_backoff: config.empty_batch_backoff(),
        }
    }
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self::from(&IngestionConfig::default())
    }
}

/// How a vectorization run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorizeOutcome {
    /// No eligible records remain
    Completed,
    Cancelled,
    /// Stopped by shutdown; the job keeps its status
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorizeSummary {
    pub embedded: i64,
    pub permanently_failed: i64,
    /// Scan iterations that reached the generator
    pub batches: usize,
    pub outcome: VectorizeOutcome,
}

#[derive(Clone)]
pub struct Vectorizer {
    store: Arc<dyn PipelineStore>,
    embeddings: Arc<dyn EmbeddingService>,
    config: VectorizerConfig,
}

impl Vectorizer {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        embeddings: Arc<dyn EmbeddingService>,
        config: VectorizerConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            config: VectorizerConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
        }
    }

    /// Embed every pending record of `project_id` on behalf of `job_id`
    ///
    /// # Errors
    ///
    /// Returns a store error if a scan, embedding write or progress write
    /// fails; generator failures only count against per-record retries
    pub async fn run(
        &self,
        job_id: Uuid,
        project_id: &str,
        cancellation: &JobCancellation,
    ) -> IngestionResult<VectorizeSummary> {
        let mut retries: HashMap<i64, u32> = HashMap::new();
        let mut excluded: Vec<i64> = Vec::new();
        let mut summary = VectorizeSummary {
            embedded: 0,
            permanently_failed: 0,
            batches: 0,
            outcome: VectorizeOutcome::Completed,
        };

        loop {
            match cancellation.check().await? {
                Checkpoint::Continue => {}
                Checkpoint::Cancelled => {
                    summary.outcome = VectorizeOutcome::Cancelled;
                    break;
                }
                Checkpoint::Shutdown => {
                    summary.outcome = VectorizeOutcome::Interrupted;
                    break;
                }
            }

            let batch = self
                .store
                .fetch_pending_embeddings(project_id, &excluded, self.config.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }

            let (eligible, exhausted): (Vec<EmbeddingCandidate>, Vec<EmbeddingCandidate>) = batch
                .into_iter()
                .partition(|c| retries.get(&c.id).copied().unwrap_or(0) < self.config.max_retries);

            for candidate in &exhausted {
                self.store.mark_embedding_failed(candidate.id).await?;
                retries.remove(&candidate.id);
                excluded.push(candidate.id);
                tracing::warn!(
                    %job_id,
                    record_id = candidate.id,
                    attempts = self.config.max_retries,
                    "Embedding retries exhausted, record marked permanently failed"
                );
            }
            let failed_now = i64::try_from(exhausted.len()).unwrap_or(i64::MAX);
            summary.permanently_failed = summary.permanently_failed.saturating_add(failed_now);

            if eligible.is_empty() {
                self.store
                    .record_vector_progress(&job_id, 0, failed_now)
                    .await?;
                continue;
            }

            let texts: Vec<&str> = eligible.iter().map(|c| c.content.as_str()).collect();
            let vectors = self.embeddings.generate_embeddings(texts).await;
            summary.batches = summary.batches.saturating_add(1);

            let mut succeeded = 0i64;
            for (position, candidate) in eligible.iter().enumerate() {
                match vectors.get(position).filter(|v| !v.is_empty()) {
                    Some(vector) => {
                        self.store.store_embedding(candidate.id, vector).await?;
                        retries.remove(&candidate.id);
                        succeeded = succeeded.saturating_add(1);
                    }
                    None => {
                        let attempts = retries.entry(candidate.id).or_insert(0);
                        *attempts = attempts.saturating_add(1);
                    }
                }
            }

            summary.embedded = summary.embedded.saturating_add(succeeded);
            self.store
                .record_vector_progress(&job_id, succeeded, failed_now)
                .await?;

            tracing::debug!(
                %job_id,
                %project_id,
                attempted = eligible.len(),
                succeeded,
                "Phase 2 batch finished"
            );

            if succeeded == 0 {
                tracing::warn!(
                    %job_id,
                    backoff_ms = self.config.empty_batch_backoff.as_millis(),
                    "Embedding batch produced no vectors, backing off"
                );
                tokio::select! {
                    () = tokio::time::sleep(self.config.empty_batch_backoff) => {}
                    () = cancellation.shutdown_token().cancelled() => {}
                }
            }
        }

        tracing::info!(
            %job_id,
            %project_id,
            embedded = summary.embedded,
            permanently_failed = summary.permanently_failed,
            outcome = ?summary.outcome,
            "Phase 2 finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskaudit_embeddings::{DefaultEmbeddingService, MockEmbeddingProvider};
    use taskaudit_meta_data::{
        EmbeddingState, JobStatus, MockRepository, NewJob, NewRecord, RecordType,
    };
    use tokio_util::sync::CancellationToken;

    async fn vectorizing_job(repo: &MockRepository, project: &str) -> Uuid {
        let job = repo
            .create_job(&NewJob {
                job_id: Uuid::new_v4(),
                project_id: project.to_string(),
                record_type: RecordType::Task,
                generate_embeddings: true,
                correlation_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        repo.set_status(&job.job_id, JobStatus::Vectorizing);
        job.job_id
    }

    async fn seed(repo: &MockRepository, project: &str, contents: &[String]) {
        let now = Utc::now();
        for content in contents {
            repo.create_record(&NewRecord {
                job_id: None,
                project_id: project.to_string(),
                record_type: RecordType::Task,
                external_id: None,
                metadata: serde_json::json!({}),
                content: content.clone(),
                category: None,
                source: None,
                creator_id: None,
                creator_name: None,
                creator_email: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        }
    }

    fn vectorizer(repo: &MockRepository, provider: MockEmbeddingProvider) -> Vectorizer {
        let service = DefaultEmbeddingService::with_provider(
            Arc::new(provider),
            100,
            Duration::from_secs(5),
        );
        Vectorizer::new(
            Arc::new(repo.clone()),
            Arc::new(service),
            VectorizerConfig {
                batch_size: 4,
                max_retries: 3,
                empty_batch_backoff: Duration::from_secs(2),
            },
        )
    }

    fn check(repo: &MockRepository, job_id: Uuid) -> JobCancellation {
        JobCancellation::new(job_id, Arc::new(repo.clone()), CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failures_terminate_and_are_marked() {
        let repo = MockRepository::new();
        let job_id = vectorizing_job(&repo, "p").await;
        let contents: Vec<String> = (0..10)
            .map(|i| {
                if i % 3 == 0 {
                    format!("unembeddable {i}")
                } else {
                    format!("record {i}")
                }
            })
            .collect();
        seed(&repo, "p", &contents).await;

        let summary = vectorizer(&repo, MockEmbeddingProvider::new(4).failing_on("unembeddable"))
            .run(job_id, "p", &check(&repo, job_id))
            .await
            .unwrap();

        assert_eq!(summary.outcome, VectorizeOutcome::Completed);
        assert_eq!(summary.embedded, 6);
        assert_eq!(summary.permanently_failed, 4);

        let counts = repo.count_records("p").await.unwrap();
        assert_eq!(counts.embedded, 6);
        assert_eq!(counts.permanently_failed, 4);
        assert_eq!(counts.pending, 0);

        let job = repo.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.embedded_count, 6);
        assert_eq!(job.embedding_failed_count, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_failing_record_gets_exactly_max_attempts() {
        let repo = MockRepository::new();
        let job_id = vectorizing_job(&repo, "p").await;
        seed(&repo, "p", &["doomed one".to_string()]).await;
        let provider = MockEmbeddingProvider::new(4).with_failure();

        let summary = vectorizer(&repo, provider.clone())
            .run(job_id, "p", &check(&repo, job_id))
            .await
            .unwrap();

        assert_eq!(summary.batches, 3);
        assert_eq!(provider.calls(), 3);
        assert_eq!(summary.permanently_failed, 1);
        assert_eq!(
            repo.all_records()[0].embedding_state,
            EmbeddingState::PermanentlyFailed
        );
    }

    #[tokio::test]
    async fn test_scan_is_partition_wide_and_skips_done_records() {
        let repo = MockRepository::new();
        seed(&repo, "p", &["left over".to_string(), "fresh".to_string()]).await;
        seed(&repo, "other", &["not mine".to_string()]).await;
        let first = repo.all_records()[0].id;
        repo.store_embedding(first, &[1.0; 4]).await.unwrap();
        let job_id = vectorizing_job(&repo, "p").await;

        let summary = vectorizer(&repo, MockEmbeddingProvider::new(4))
            .run(job_id, "p", &check(&repo, job_id))
            .await
            .unwrap();

        assert_eq!(summary.embedded, 1);
        assert_eq!(repo.count_records("other").await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_cancelled_job_stops_before_scanning() {
        let repo = MockRepository::new();
        seed(&repo, "p", &["waiting".to_string()]).await;
        let job_id = vectorizing_job(&repo, "p").await;
        repo.set_status(&job_id, JobStatus::Cancelled);

        let summary = vectorizer(&repo, MockEmbeddingProvider::new(4))
            .run(job_id, "p", &check(&repo, job_id))
            .await
            .unwrap();

        assert_eq!(summary.outcome, VectorizeOutcome::Cancelled);
        assert_eq!(repo.count_records("p").await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_keeps_written_embeddings() {
        let repo = MockRepository::new();
        let contents: Vec<String> = (0..12).map(|i| format!("record {i}")).collect();
        seed(&repo, "p", &contents).await;
        let job_id = vectorizing_job(&repo, "p").await;
        repo.cancel_after_vector_batches(1);

        let summary = vectorizer(&repo, MockEmbeddingProvider::new(4))
            .run(job_id, "p", &check(&repo, job_id))
            .await
            .unwrap();

        assert_eq!(summary.outcome, VectorizeOutcome::Cancelled);
        assert_eq!(summary.batches, 1);
        assert_eq!(summary.embedded, 4);

        let records = repo.all_records();
        let done = records
            .iter()
            .filter(|r| r.embedding_state == EmbeddingState::Done)
            .count();
        let pending = records
            .iter()
            .filter(|r| r.embedding_state == EmbeddingState::Pending)
            .count();
        assert_eq!(done, 4);
        assert_eq!(pending, 8);
        assert!(
            records
                .iter()
                .filter(|r| r.embedding_state == EmbeddingState::Done)
                .all(|r| r.embedding.as_ref().is_some_and(|v| v.len() == 4))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_follows_each_batch_without_successes() {
        let repo = MockRepository::new();
        let job_id = vectorizing_job(&repo, "p").await;
        seed(&repo, "p", &["never embeds".to_string()]).await;

        let started = tokio::time::Instant::now();
        let summary = vectorizer(&repo, MockEmbeddingProvider::new(4).with_failure())
            .run(job_id, "p", &check(&repo, job_id))
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(summary.batches, 3);
        assert!(elapsed >= Duration::from_secs(6), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(7), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_backoff_when_batches_succeed() {
        let repo = MockRepository::new();
        let job_id = vectorizing_job(&repo, "p").await;
        let contents: Vec<String> = (0..8).map(|i| format!("record {i}")).collect();
        seed(&repo, "p", &contents).await;

        let started = tokio::time::Instant::now();
        let summary = vectorizer(&repo, MockEmbeddingProvider::new(4))
            .run(job_id, "p", &check(&repo, job_id))
            .await
            .unwrap();

        assert_eq!(summary.embedded, 8);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_store_failure_is_job_fatal() {
        let repo = MockRepository::new();
        let job_id = vectorizing_job(&repo, "p").await;
        repo.fail_next("connection reset");

        let result = vectorizer(&repo, MockEmbeddingProvider::new(4))
            .run(job_id, "p", &check(&repo, job_id))
            .await;

        assert!(result.is_err());
    }
}
