//! In-memory implementation of both store traits for testing

// Allow test-specific patterns in mock implementation
#![allow(clippy::unwrap_used)] // Mocks can panic on lock poisoning
#![allow(clippy::expect_used)] // Test code can use expect
#![allow(clippy::arithmetic_side_effects)] // Test counters can overflow
#![allow(clippy::significant_drop_tightening)] // Mock locks don't need optimization

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::error::{DatabaseError, DatabaseOperation, DatabaseResult};
use crate::models::{
    BatchProgress, EmbeddingCandidate, EmbeddingState, IngestionJob, JobStatus, NewJob, NewRecord,
    Record, RecordCounts, RecordType, merge_skipped_details,
};
use crate::traits::{JobRepository, RecordRepository};

type JobMap = Arc<Mutex<HashMap<Uuid, IngestionJob>>>;
type RecordMap = Arc<Mutex<BTreeMap<i64, Record>>>;

/// Mock repository for testing
///
/// Besides storing jobs and records, it exposes hooks that let tests inject
/// failures, hold Phase 1 inserts open, and cancel a job after a number of
/// committed batches.
#[derive(Clone)]
pub struct MockRepository {
    pub jobs: JobMap,
    pub records: RecordMap,
    next_record_id: Arc<Mutex<i64>>,

    // Behavior controls for testing
    should_fail_next: Arc<Mutex<bool>>,
    error_message: Arc<Mutex<String>>,
    failing_insert_marker: Arc<Mutex<Option<String>>>,
    failing_lookup_id: Arc<Mutex<Option<String>>>,
    insert_gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
    cancel_after_batches: Arc<Mutex<Option<usize>>>,
    cancel_after_vector_batches: Arc<Mutex<Option<usize>>>,
    job_creation_delay: Arc<Mutex<Option<Duration>>>,
    batch_updates: Arc<Mutex<HashMap<Uuid, usize>>>,
    vector_updates: Arc<Mutex<HashMap<Uuid, usize>>>,
    job_clock: Arc<Mutex<i64>>,
}

impl Default for MockRepository {
    fn default() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            records: Arc::new(Mutex::new(BTreeMap::new())),
            next_record_id: Arc::new(Mutex::new(1)),
            should_fail_next: Arc::new(Mutex::new(false)),
            error_message: Arc::new(Mutex::new("Mock error".to_string())),
            failing_insert_marker: Arc::new(Mutex::new(None)),
            failing_lookup_id: Arc::new(Mutex::new(None)),
            insert_gate: Arc::new(Mutex::new(None)),
            cancel_after_batches: Arc::new(Mutex::new(None)),
            cancel_after_vector_batches: Arc::new(Mutex::new(None)),
            job_creation_delay: Arc::new(Mutex::new(None)),
            batch_updates: Arc::new(Mutex::new(HashMap::new())),
            vector_updates: Arc::new(Mutex::new(HashMap::new())),
            job_clock: Arc::new(Mutex::new(0)),
        }
    }
}

impl MockRepository {
    /// Create a new mock repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the next store call to fail
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn fail_next(&self, message: &str) {
        *self.should_fail_next.lock().unwrap() = true;
        *self.error_message.lock().unwrap() = message.to_string();
    }

    /// Fail every `create_record` whose content contains `marker`
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn fail_inserts_containing(&self, marker: &str) {
        *self.failing_insert_marker.lock().unwrap() = Some(marker.to_string());
    }

    /// Fail every duplicate lookup for `external_id`
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn fail_lookups_for(&self, external_id: &str) {
        *self.failing_lookup_id.lock().unwrap() = Some(external_id.to_string());
    }

    /// Make `create_record` wait for a permit from the returned semaphore
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn gate_inserts(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.insert_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Flip a job to CANCELLED right after its `batches`-th progress update
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn cancel_after_batches(&self, batches: usize) {
        *self.cancel_after_batches.lock().unwrap() = Some(batches);
    }

    /// Flip a job to CANCELLED right after its `batches`-th Phase 2 progress update
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn cancel_after_vector_batches(&self, batches: usize) {
        *self.cancel_after_vector_batches.lock().unwrap() = Some(batches);
    }

    /// Hold back the `create_job` reply for `delay` after the row is stored
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn delay_job_creation(&self, delay: Duration) {
        *self.job_creation_delay.lock().unwrap() = Some(delay);
    }

    /// Insert a job directly, bypassing the scheduler
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn insert_job(&self, job: IngestionJob) {
        self.jobs.lock().unwrap().insert(job.job_id, job);
    }

    /// Force a job's status without compare-and-set
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn set_status(&self, job_id: &Uuid, status: JobStatus) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(job_id) {
            job.status = status;
        }
    }

    /// Snapshot of every stored record, ordered by id
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn all_records(&self) -> Vec<Record> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    /// Check if should fail and reset
    fn check_fail(&self) -> DatabaseResult<()> {
        let mut should_fail = self.should_fail_next.lock().unwrap();
        if *should_fail {
            *should_fail = false;
            let message = self.error_message.lock().unwrap().clone();
            return Err(mock_error(message));
        }
        Ok(())
    }

    /// Monotonic creation timestamps so FIFO order is stable within one test
    fn next_job_time(&self) -> chrono::DateTime<Utc> {
        let mut clock = self.job_clock.lock().unwrap();
        *clock += 1;
        Utc::now() + chrono::Duration::microseconds(*clock)
    }
}

fn mock_error(message: String) -> DatabaseError {
    DatabaseError::UnexpectedState {
        operation: Box::new(DatabaseOperation::Query {
            description: "mock operation".to_string(),
        }),
        message,
        correlation_id: None,
    }
}

#[async_trait]
impl JobRepository for MockRepository {
    async fn create_job(&self, job: &NewJob) -> DatabaseResult<IngestionJob> {
        self.check_fail()?;
        let now = self.next_job_time();
        let created = IngestionJob {
            job_id: job.job_id,
            project_id: job.project_id.clone(),
            record_type: job.record_type,
            status: JobStatus::Pending,
            total_records: 0,
            saved_count: 0,
            skipped_count: 0,
            skipped_details: BTreeMap::new(),
            embedded_count: 0,
            embedding_failed_count: 0,
            error_message: None,
            generate_embeddings: job.generate_embeddings,
            correlation_id: job.correlation_id,
            created_at: now,
            updated_at: now,
        };
        self.jobs
            .lock()
            .unwrap()
            .insert(created.job_id, created.clone());

        let delay = *self.job_creation_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(created)
    }

    async fn get_job(&self, job_id: &Uuid) -> DatabaseResult<Option<IngestionJob>> {
        self.check_fail()?;
        Ok(self.jobs.lock().unwrap().get(job_id).cloned())
    }

    async fn get_job_status(&self, job_id: &Uuid) -> DatabaseResult<Option<JobStatus>> {
        self.check_fail()?;
        Ok(self.jobs.lock().unwrap().get(job_id).map(|j| j.status))
    }

    async fn transition_job(
        &self,
        job_id: &Uuid,
        from: &[JobStatus],
        to: JobStatus,
        error: Option<&str>,
    ) -> DatabaseResult<bool> {
        self.check_fail()?;
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(job_id) {
            Some(job) if from.contains(&job.status) => {
                job.status = to;
                if let Some(error) = error {
                    job.error_message = Some(error.to_string());
                }
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_total_records(&self, job_id: &Uuid, total: i64) -> DatabaseResult<()> {
        self.check_fail()?;
        if let Some(job) = self.jobs.lock().unwrap().get_mut(job_id) {
            job.total_records = total;
        }
        Ok(())
    }

    async fn record_batch_progress(
        &self,
        job_id: &Uuid,
        progress: &BatchProgress,
    ) -> DatabaseResult<()> {
        self.check_fail()?;
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(job_id) {
            job.saved_count += progress.saved;
            job.skipped_count += progress.skipped;
            merge_skipped_details(&mut job.skipped_details, &progress.skipped_details);
            job.updated_at = Utc::now();

            let mut updates = self.batch_updates.lock().unwrap();
            let count = updates.entry(*job_id).or_insert(0);
            *count += 1;
            if *self.cancel_after_batches.lock().unwrap() == Some(*count) {
                job.status = JobStatus::Cancelled;
            }
        }
        Ok(())
    }

    async fn record_vector_progress(
        &self,
        job_id: &Uuid,
        embedded: i64,
        failed: i64,
    ) -> DatabaseResult<()> {
        self.check_fail()?;
        if let Some(job) = self.jobs.lock().unwrap().get_mut(job_id) {
            job.embedded_count += embedded;
            job.embedding_failed_count += failed;

            let mut updates = self.vector_updates.lock().unwrap();
            let count = updates.entry(*job_id).or_insert(0);
            *count += 1;
            if *self.cancel_after_vector_batches.lock().unwrap() == Some(*count) {
                job.status = JobStatus::Cancelled;
            }
        }
        Ok(())
    }

    async fn find_oldest_pending(&self, project_id: &str) -> DatabaseResult<Option<IngestionJob>> {
        Ok(self
            .find_jobs_with_status(project_id, &[JobStatus::Pending])
            .await?
            .into_iter()
            .next())
    }

    async fn find_processing(&self, project_id: &str) -> DatabaseResult<Option<IngestionJob>> {
        Ok(self
            .find_jobs_with_status(project_id, &[JobStatus::Processing])
            .await?
            .into_iter()
            .next())
    }

    async fn find_jobs_with_status(
        &self,
        project_id: &str,
        statuses: &[JobStatus],
    ) -> DatabaseResult<Vec<IngestionJob>> {
        self.check_fail()?;
        let mut jobs: Vec<IngestionJob> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.project_id == project_id && statuses.contains(&j.status))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.job_id));
        Ok(jobs)
    }

    async fn list_recent_jobs(
        &self,
        project_id: &str,
        limit: usize,
    ) -> DatabaseResult<Vec<IngestionJob>> {
        self.check_fail()?;
        let mut jobs: Vec<IngestionJob> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.project_id == project_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| std::cmp::Reverse((j.created_at, j.job_id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn list_active_projects(&self) -> DatabaseResult<Vec<String>> {
        self.check_fail()?;
        let projects: std::collections::BTreeSet<String> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| !j.status.is_terminal())
            .map(|j| j.project_id.clone())
            .collect();
        Ok(projects.into_iter().collect())
    }

    async fn delete_job(&self, job_id: &Uuid) -> DatabaseResult<bool> {
        self.check_fail()?;
        self.records
            .lock()
            .unwrap()
            .retain(|_, r| r.job_id != Some(*job_id));
        Ok(self.jobs.lock().unwrap().remove(job_id).is_some())
    }
}

#[async_trait]
impl RecordRepository for MockRepository {
    async fn create_record(&self, record: &NewRecord) -> DatabaseResult<Record> {
        let gate = self.insert_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|e| mock_error(e.to_string()))?
                .forget();
        }

        self.check_fail()?;
        if let Some(marker) = self.failing_insert_marker.lock().unwrap().as_deref()
            && record.content.contains(marker)
        {
            return Err(mock_error(format!("insert rejected: {marker}")));
        }

        let id = {
            let mut next = self.next_record_id.lock().unwrap();
            let id = *next;
            *next += 1;
            id
        };
        let created = Record {
            id,
            job_id: record.job_id,
            project_id: record.project_id.clone(),
            record_type: record.record_type,
            external_id: record.external_id.clone(),
            metadata: record.metadata.clone(),
            content: record.content.clone(),
            category: record.category,
            embedding: None,
            embedding_state: EmbeddingState::Pending,
            source: record.source.clone(),
            creator_id: record.creator_id.clone(),
            creator_name: record.creator_name.clone(),
            creator_email: record.creator_email.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        };
        self.records.lock().unwrap().insert(id, created.clone());
        Ok(created)
    }

    async fn external_id_exists(
        &self,
        project_id: &str,
        record_type: RecordType,
        external_id: &str,
    ) -> DatabaseResult<bool> {
        self.check_fail()?;
        if self.failing_lookup_id.lock().unwrap().as_deref() == Some(external_id) {
            return Err(mock_error(format!("lookup failed: {external_id}")));
        }
        Ok(self.records.lock().unwrap().values().any(|r| {
            r.project_id == project_id
                && r.record_type == record_type
                && r.external_id.as_deref() == Some(external_id)
        }))
    }

    async fn fetch_pending_embeddings(
        &self,
        project_id: &str,
        exclude: &[i64],
        limit: usize,
    ) -> DatabaseResult<Vec<EmbeddingCandidate>> {
        self.check_fail()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                r.project_id == project_id
                    && r.embedding_state == EmbeddingState::Pending
                    && !exclude.contains(&r.id)
            })
            .take(limit)
            .map(|r| EmbeddingCandidate {
                id: r.id,
                content: r.content.clone(),
            })
            .collect())
    }

    async fn store_embedding(&self, record_id: i64, embedding: &[f32]) -> DatabaseResult<()> {
        self.check_fail()?;
        if let Some(record) = self.records.lock().unwrap().get_mut(&record_id) {
            record.embedding = Some(embedding.to_vec());
            record.embedding_state = EmbeddingState::Done;
        }
        Ok(())
    }

    async fn mark_embedding_failed(&self, record_id: i64) -> DatabaseResult<()> {
        self.check_fail()?;
        if let Some(record) = self.records.lock().unwrap().get_mut(&record_id)
            && record.embedding_state == EmbeddingState::Pending
        {
            record.embedding_state = EmbeddingState::PermanentlyFailed;
        }
        Ok(())
    }

    async fn get_record(&self, record_id: i64) -> DatabaseResult<Option<Record>> {
        self.check_fail()?;
        Ok(self.records.lock().unwrap().get(&record_id).cloned())
    }

    async fn list_job_records(&self, job_id: &Uuid) -> DatabaseResult<Vec<Record>> {
        self.check_fail()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.job_id == Some(*job_id))
            .cloned()
            .collect())
    }

    async fn count_records(&self, project_id: &str) -> DatabaseResult<RecordCounts> {
        self.check_fail()?;
        let records = self.records.lock().unwrap();
        let mut counts = RecordCounts::default();
        for record in records.values().filter(|r| r.project_id == project_id) {
            counts.total += 1;
            match record.embedding_state {
                EmbeddingState::Pending => counts.pending += 1,
                EmbeddingState::Done => counts.embedded += 1,
                EmbeddingState::PermanentlyFailed => counts.permanently_failed += 1,
            }
        }
        Ok(counts)
    }
}
