//! Chunk Loader (Phase 1)
//!
//! Persists classified, filtered and de-duplicated rows in fixed-size
//! batches. Each batch is a checkpoint: the job's status is re-read before
//! it starts and its counters are committed after it ends.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use taskaudit_meta_data::{
    BatchProgress, JobRepository, NewRecord, QualityCategory, RecordRepository, RecordType,
};
use uuid::Uuid;

use crate::cancellation::{Checkpoint, JobCancellation};
use crate::classifier::{ContentClassifier, extract_external_id, extract_provenance};
use crate::dedup::DuplicateFilter;
use crate::error::IngestionResult;
use crate::store::PipelineStore;

pub const SKIP_KEYWORD_MISMATCH: &str = "Keyword Mismatch";
pub const SKIP_DUPLICATE_ID: &str = "Duplicate ID";
pub const SKIP_INSERT_FAILED: &str = "Insert Failed";
pub const SKIP_DUPLICATE_CHECK_FAILED: &str = "Duplicate Check Failed";

/// Per-job ingestion settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionOptions {
    pub project_id: String,
    pub record_type: RecordType,
    /// Default source tag for rows that carry none
    pub source: Option<String>,
    /// Rows must contain at least one of these (case-insensitive); empty disables
    pub keywords: Vec<String>,
    pub generate_embeddings: bool,
    /// Correlation id of the admitting request; a fresh one is minted when unset
    pub correlation_id: Option<Uuid>,
}

impl IngestionOptions {
    pub fn new(project_id: impl Into<String>, record_type: RecordType) -> Self {
        Self {
            project_id: project_id.into(),
            record_type,
            source: None,
            keywords: Vec::new(),
            generate_embeddings: false,
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn with_embeddings(mut self, generate: bool) -> Self {
        self.generate_embeddings = generate;
        self
    }

    #[must_use]
    pub const fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Lowercased non-blank keywords
    fn normalized_keywords(&self) -> Vec<String> {
        self.keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect()
    }
}

/// How a load ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Completed,
    Cancelled,
    /// Stopped by shutdown; the job keeps its status
    Interrupted,
}

/// Totals of the batches that committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub progress: BatchProgress,
    pub batches: usize,
    pub outcome: LoadOutcome,
}

impl LoadSummary {
    pub const fn cancelled(&self) -> bool {
        matches!(self.outcome, LoadOutcome::Cancelled)
    }
}

/// Row that passed the keyword filter
struct Candidate<'a> {
    row: &'a Value,
    content: String,
    category: Option<QualityCategory>,
    external_id: Option<String>,
}

#[derive(Clone)]
pub struct ChunkLoader {
    store: Arc<dyn PipelineStore>,
    duplicates: DuplicateFilter,
    classifier: ContentClassifier,
    chunk_size: usize,
}

impl ChunkLoader {
    pub fn new(store: Arc<dyn PipelineStore>, chunk_size: usize, min_content_length: usize) -> Self {
        Self {
            duplicates: DuplicateFilter::new(Arc::clone(&store)),
            store,
            classifier: ContentClassifier::new(min_content_length),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Load `rows` for `job_id`
    ///
    /// # Errors
    ///
    /// Returns a store error if a checkpoint read or a progress write fails;
    /// row-level failures are tallied as skips instead
    pub async fn load(
        &self,
        job_id: Uuid,
        rows: &[Value],
        options: &IngestionOptions,
        cancellation: &JobCancellation,
    ) -> IngestionResult<LoadSummary> {
        let keywords = options.normalized_keywords();
        let mut seen: HashSet<String> = HashSet::new();
        let mut total = BatchProgress::default();
        let mut batches = 0usize;

        for batch in rows.chunks(self.chunk_size) {
            let outcome = match cancellation.check().await? {
                Checkpoint::Continue => None,
                Checkpoint::Cancelled => Some(LoadOutcome::Cancelled),
                Checkpoint::Shutdown => Some(LoadOutcome::Interrupted),
            };
            if let Some(outcome) = outcome {
                tracing::info!(
                    %job_id,
                    batches,
                    saved = total.saved,
                    skipped = total.skipped,
                    ?outcome,
                    "Phase 1 stopped early"
                );
                return Ok(LoadSummary {
                    progress: total,
                    batches,
                    outcome,
                });
            }

            let progress = self
                .load_batch(job_id, batch, options, &keywords, &mut seen)
                .await;
            self.store.record_batch_progress(&job_id, &progress).await?;
            total.merge(&progress);
            batches = batches.saturating_add(1);

            tracing::debug!(
                %job_id,
                batch = batches,
                saved = progress.saved,
                skipped = progress.skipped,
                "Committed Phase 1 batch"
            );
        }

        tracing::info!(
            %job_id,
            project_id = %options.project_id,
            saved = total.saved,
            skipped = total.skipped,
            "Phase 1 complete"
        );
        Ok(LoadSummary {
            progress: total,
            batches,
            outcome: LoadOutcome::Completed,
        })
    }

    async fn load_batch(
        &self,
        job_id: Uuid,
        batch: &[Value],
        options: &IngestionOptions,
        keywords: &[String],
        seen: &mut HashSet<String>,
    ) -> BatchProgress {
        let mut progress = BatchProgress::default();

        // Keyword filter runs first; a mismatching duplicate counts once
        let mut candidates = Vec::with_capacity(batch.len());
        for row in batch {
            let classification = self.classifier.classify(row);
            if !matches_keywords(&classification.content, keywords) {
                progress.skip(SKIP_KEYWORD_MISMATCH);
                continue;
            }
            candidates.push(Candidate {
                row,
                content: classification.content,
                category: classification.category,
                external_id: extract_external_id(row),
            });
        }

        let ids: Vec<Option<String>> = candidates.iter().map(|c| c.external_id.clone()).collect();
        let lookups = self
            .duplicates
            .check_all(&options.project_id, options.record_type, &ids)
            .await;

        for (candidate, lookup) in candidates.into_iter().zip(lookups) {
            match lookup {
                Ok(true) => {
                    progress.skip(SKIP_DUPLICATE_ID);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        %job_id,
                        external_id = ?candidate.external_id,
                        error = %e,
                        "Duplicate check failed, skipping row"
                    );
                    progress.skip(SKIP_DUPLICATE_CHECK_FAILED);
                    continue;
                }
            }

            // Same id earlier in this job, not yet visible to the lookups
            if let Some(id) = &candidate.external_id
                && seen.contains(id)
            {
                progress.skip(SKIP_DUPLICATE_ID);
                continue;
            }

            let record = build_record(job_id, &candidate, options);
            match self.store.create_record(&record).await {
                Ok(_) => {
                    if let Some(id) = candidate.external_id {
                        seen.insert(id);
                    }
                    progress.saved = progress.saved.saturating_add(1);
                }
                Err(e) => {
                    tracing::warn!(
                        %job_id,
                        external_id = ?candidate.external_id,
                        error = %e,
                        "Record insert failed, skipping row"
                    );
                    progress.skip(SKIP_INSERT_FAILED);
                }
            }
        }

        progress
    }
}

fn matches_keywords(content: &str, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let content = content.to_lowercase();
    keywords.iter().any(|k| content.contains(k.as_str()))
}

fn build_record(job_id: Uuid, candidate: &Candidate<'_>, options: &IngestionOptions) -> NewRecord {
    let provenance = extract_provenance(candidate.row);
    let now = Utc::now();
    let created_at = provenance.created_at.unwrap_or(now);
    NewRecord {
        job_id: Some(job_id),
        project_id: options.project_id.clone(),
        record_type: options.record_type,
        external_id: candidate.external_id.clone(),
        metadata: candidate.row.clone(),
        content: candidate.content.clone(),
        category: candidate.category,
        source: provenance.source.or_else(|| options.source.clone()),
        creator_id: provenance.creator_id,
        creator_name: provenance.creator_name,
        creator_email: provenance.creator_email,
        created_at,
        updated_at: provenance.updated_at.unwrap_or(created_at),
    }
}
