//! Store traits for dependency injection and testing

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseResult;
use crate::models::{
    BatchProgress, EmbeddingCandidate, IngestionJob, JobStatus, NewJob, NewRecord, Record,
    RecordCounts, RecordType,
};

/// Durable job table
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job in PENDING
    async fn create_job(&self, job: &NewJob) -> DatabaseResult<IngestionJob>;

    /// Read a job with its counters
    async fn get_job(&self, job_id: &Uuid) -> DatabaseResult<Option<IngestionJob>>;

    /// Read only the status column (cheap cancellation checkpoint)
    async fn get_job_status(&self, job_id: &Uuid) -> DatabaseResult<Option<JobStatus>>;

    /// Move a job to `to` only if it currently holds one of `from`
    ///
    /// `error` is recorded alongside the new status when given.
    /// Returns `false` when the job was not in any of the expected states.
    async fn transition_job(
        &self,
        job_id: &Uuid,
        from: &[JobStatus],
        to: JobStatus,
        error: Option<&str>,
    ) -> DatabaseResult<bool>;

    /// Best-effort row count, known once the payload is parsed
    async fn set_total_records(&self, job_id: &Uuid, total: i64) -> DatabaseResult<()>;

    /// Add a Phase 1 batch to the job's cumulative counters
    async fn record_batch_progress(
        &self,
        job_id: &Uuid,
        progress: &BatchProgress,
    ) -> DatabaseResult<()>;

    /// Add Phase 2 results to the job's counters
    async fn record_vector_progress(
        &self,
        job_id: &Uuid,
        embedded: i64,
        failed: i64,
    ) -> DatabaseResult<()>;

    /// Oldest PENDING job of a partition (FIFO head)
    async fn find_oldest_pending(&self, project_id: &str) -> DatabaseResult<Option<IngestionJob>>;

    /// The partition's PROCESSING job, if any
    async fn find_processing(&self, project_id: &str) -> DatabaseResult<Option<IngestionJob>>;

    /// Jobs of a partition in any of `statuses`, oldest first
    async fn find_jobs_with_status(
        &self,
        project_id: &str,
        statuses: &[JobStatus],
    ) -> DatabaseResult<Vec<IngestionJob>>;

    /// Most recent jobs of a partition, newest first
    async fn list_recent_jobs(
        &self,
        project_id: &str,
        limit: usize,
    ) -> DatabaseResult<Vec<IngestionJob>>;

    /// Partitions that still have non-terminal jobs
    async fn list_active_projects(&self) -> DatabaseResult<Vec<String>>;

    /// Delete a job and every record it created
    ///
    /// Returns `false` if the job did not exist.
    async fn delete_job(&self, job_id: &Uuid) -> DatabaseResult<bool>;
}

/// Durable record table
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Atomically create one record (embedding state PENDING)
    async fn create_record(&self, record: &NewRecord) -> DatabaseResult<Record>;

    /// Whether a record with this external id exists for (partition, type)
    async fn external_id_exists(
        &self,
        project_id: &str,
        record_type: RecordType,
        external_id: &str,
    ) -> DatabaseResult<bool>;

    /// Records in PENDING embedding state, ordered by id, skipping `exclude`
    async fn fetch_pending_embeddings(
        &self,
        project_id: &str,
        exclude: &[i64],
        limit: usize,
    ) -> DatabaseResult<Vec<EmbeddingCandidate>>;

    /// Persist an embedding and mark the record DONE
    async fn store_embedding(&self, record_id: i64, embedding: &[f32]) -> DatabaseResult<()>;

    /// Mark a record PERMANENTLY_FAILED so future scans skip it
    async fn mark_embedding_failed(&self, record_id: i64) -> DatabaseResult<()>;

    /// Read one record
    async fn get_record(&self, record_id: i64) -> DatabaseResult<Option<Record>>;

    /// Records created by a job, ordered by id
    async fn list_job_records(&self, job_id: &Uuid) -> DatabaseResult<Vec<Record>>;

    /// Record totals for a partition
    async fn count_records(&self, project_id: &str) -> DatabaseResult<RecordCounts>;
}
