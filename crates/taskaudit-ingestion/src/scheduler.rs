//! Job Scheduler
//!
//! Each partition gets one lane worker: a task that drains the partition's
//! PENDING jobs oldest first and runs their Phase 1 one at a time, so a
//! partition never holds two PROCESSING jobs. Enqueue and every other event
//! that may free the lane just notify that worker.
//!
//! Phase 2 runs outside the lane, serialized per partition by a vector lock.
//! Job B's Phase 1 can therefore overlap job A's Phase 2, while two Phase 2
//! scans of one partition never run at once.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use taskaudit_config::IngestionConfig;
use taskaudit_embeddings::EmbeddingService;
use taskaudit_meta_data::{IngestionJob, JobRepository, JobStatus, NewJob};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::cancellation::JobCancellation;
use crate::error::{IngestionError, IngestionResult};
use crate::loader::{ChunkLoader, IngestionOptions, LoadOutcome, LoadSummary};
use crate::payload::{IngestionPayload, PayloadParser};
use crate::payload_cache::{CachedPayload, PayloadCache};
use crate::store::PipelineStore;
use crate::vectorizer::{VectorizeOutcome, Vectorizer, VectorizerConfig};

pub const RESTART_INTERRUPTED: &str = "Job interrupted by server restart";
pub const PAYLOAD_LOST: &str = "Job payload lost";

/// Pause before a lane retries after a store error
const LANE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// What one admission attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// A job ran through Phase 1
    Ran,
    /// A job without payload was failed
    Skipped,
    /// Another admission owns the partition
    Busy,
    Idle,
}

/// Startup recovery results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Partitions whose lanes were woken
    pub partitions: usize,
    /// Jobs whose Phase 2 was restarted
    pub resumed_vectorization: usize,
}

struct SchedulerInner {
    store: Arc<dyn PipelineStore>,
    cache: Arc<dyn PayloadCache>,
    parser: PayloadParser,
    loader: ChunkLoader,
    vectorizer: Vectorizer,
    lanes: DashMap<String, Arc<Notify>>,
    vector_lanes: DashMap<String, Arc<Mutex<()>>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

/// Entry point of the pipeline
///
/// Cheap to clone; clones share lanes, cache and shutdown state.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    /// # Errors
    ///
    /// Returns `IngestionError::Configuration` if the endpoint HTTP client
    /// cannot be built
    pub fn new(
        store: Arc<dyn PipelineStore>,
        embeddings: Arc<dyn EmbeddingService>,
        cache: Arc<dyn PayloadCache>,
        config: &IngestionConfig,
    ) -> IngestionResult<Self> {
        let parser = PayloadParser::new(config)?;
        let loader = ChunkLoader::new(
            Arc::clone(&store),
            config.chunk_size,
            config.min_content_length,
        );
        let vectorizer = Vectorizer::new(
            Arc::clone(&store),
            embeddings,
            VectorizerConfig::from(config),
        );

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                store,
                cache,
                parser,
                loader,
                vectorizer,
                lanes: DashMap::new(),
                vector_lanes: DashMap::new(),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        })
    }

    /// Cache the payload, create its PENDING job and wake its partition
    ///
    /// The payload is cached under the job id before the row is written, so
    /// a lane that is already draining never sees the job without it.
    ///
    /// # Errors
    ///
    /// Returns `PayloadTooLarge` for oversized inline payloads,
    /// `ShuttingDown` after `shutdown`, or the store error from job creation
    pub async fn enqueue(
        &self,
        payload: IngestionPayload,
        options: IngestionOptions,
    ) -> IngestionResult<Uuid> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(IngestionError::ShuttingDown);
        }
        inner.parser.check_size(&payload)?;

        let job_id = Uuid::new_v4();
        let new_job = NewJob {
            job_id,
            project_id: options.project_id.clone(),
            record_type: options.record_type,
            generate_embeddings: options.generate_embeddings,
            correlation_id: options.correlation_id.unwrap_or_else(Uuid::new_v4),
        };
        let format = payload.format();
        let bytes = payload.size_bytes();
        inner.cache.put(job_id, CachedPayload { payload, options });

        let job = match inner.store.create_job(&new_job).await {
            Ok(job) => job,
            Err(e) => {
                inner.cache.evict(&job_id);
                return Err(e.into());
            }
        };

        tracing::info!(
            job_id = %job.job_id,
            project_id = %job.project_id,
            record_type = %job.record_type,
            format,
            bytes,
            correlation_id = %job.correlation_id,
            "Enqueued ingestion job"
        );

        inner.wake(&job.project_id);
        Ok(job.job_id)
    }

    /// Current state of a job
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` for unknown ids, or the store error
    pub async fn get_status(&self, job_id: &Uuid) -> IngestionResult<IngestionJob> {
        self.inner
            .store
            .get_job(job_id)
            .await?
            .ok_or(IngestionError::JobNotFound { job_id: *job_id })
    }

    /// Request cooperative cancellation
    ///
    /// Returns `true` if the job moved to CANCELLED, `false` if it had
    /// already failed or been cancelled.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyCompleted` for COMPLETED jobs, `JobNotFound` for
    /// unknown ids, or the store error
    pub async fn cancel(&self, job_id: &Uuid) -> IngestionResult<bool> {
        let inner = &self.inner;
        loop {
            let job = self.get_status(job_id).await?;
            match job.status {
                JobStatus::Completed => {
                    return Err(IngestionError::AlreadyCompleted { job_id: *job_id });
                }
                status if status.is_terminal() => return Ok(false),
                current => {
                    let moved = inner
                        .store
                        .transition_job(job_id, &[current], JobStatus::Cancelled, None)
                        .await?;
                    if moved {
                        if current == JobStatus::Pending {
                            inner.cache.evict(job_id);
                        }
                        inner.wake(&job.project_id);
                        tracing::info!(%job_id, from = %current, "Job cancelled");
                        return Ok(true);
                    }
                    // Status moved underneath us; re-read and decide again
                }
            }
        }
    }

    /// Most recent jobs of a partition, newest first
    ///
    /// # Errors
    ///
    /// Returns the store error
    pub async fn list_recent(
        &self,
        project_id: &str,
        limit: usize,
    ) -> IngestionResult<Vec<IngestionJob>> {
        Ok(self
            .inner
            .store
            .list_recent_jobs(project_id, limit)
            .await?)
    }

    /// Delete a finished job together with its records
    ///
    /// # Errors
    ///
    /// Returns `JobActive` unless the job is terminal, `JobNotFound` for
    /// unknown ids, or the store error
    pub async fn delete_job(&self, job_id: &Uuid) -> IngestionResult<()> {
        let job = self.get_status(job_id).await?;
        if !job.status.is_terminal() {
            return Err(IngestionError::JobActive {
                job_id: *job_id,
                status: job.status.to_string(),
            });
        }
        if !self.inner.store.delete_job(job_id).await? {
            return Err(IngestionError::JobNotFound { job_id: *job_id });
        }
        self.inner.cache.evict(job_id);
        tracing::info!(%job_id, project_id = %job.project_id, "Deleted job and its records");
        Ok(())
    }

    /// Wake every partition with unfinished jobs; run once at startup
    ///
    /// Lanes fail PROCESSING and PENDING jobs whose payload did not survive
    /// the restart. Jobs waiting for or inside Phase 2 need no payload and
    /// are resumed.
    ///
    /// # Errors
    ///
    /// Returns the store error
    pub async fn recover(&self) -> IngestionResult<RecoveryReport> {
        let inner = &self.inner;
        let projects = inner.store.list_active_projects().await?;
        let mut report = RecoveryReport {
            partitions: projects.len(),
            resumed_vectorization: 0,
        };

        for project_id in projects {
            let waiting = inner
                .store
                .find_jobs_with_status(
                    &project_id,
                    &[JobStatus::QueuedForVec, JobStatus::Vectorizing],
                )
                .await?;
            for job in waiting {
                let requeued = job.status == JobStatus::QueuedForVec
                    || inner
                        .store
                        .transition_job(
                            &job.job_id,
                            &[JobStatus::Vectorizing],
                            JobStatus::QueuedForVec,
                            None,
                        )
                        .await?;
                if requeued {
                    inner.spawn_vectorization(job.job_id, project_id.clone());
                    report.resumed_vectorization = report.resumed_vectorization.saturating_add(1);
                }
            }
            inner.wake(&project_id);
        }

        tracing::info!(
            partitions = report.partitions,
            resumed_vectorization = report.resumed_vectorization,
            "Scheduler recovery complete"
        );
        Ok(report)
    }

    /// Poll until the job is terminal
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` if the job disappears, or the store error
    pub async fn wait_for_terminal(
        &self,
        job_id: &Uuid,
        poll_interval: Duration,
    ) -> IngestionResult<IngestionJob> {
        loop {
            let job = self.get_status(job_id).await?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Stop admitting work and wait for lanes and Phase 2 tasks to stop
    ///
    /// In-flight phases stop at their next checkpoint and leave job status
    /// untouched; `recover` sorts them out on the next start.
    pub async fn shutdown(&self) {
        tracing::info!("Scheduler shutting down");
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        tracing::info!("Scheduler stopped");
    }

    pub fn payload_cache(&self) -> &Arc<dyn PayloadCache> {
        &self.inner.cache
    }
}

impl SchedulerInner {
    /// Notify the partition's lane worker, starting it on first use
    fn wake(self: &Arc<Self>, project_id: &str) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let notify = match self.lanes.entry(project_id.to_string()) {
            Entry::Occupied(lane) => Arc::clone(lane.get()),
            Entry::Vacant(slot) => {
                let notify = Arc::new(Notify::new());
                slot.insert(Arc::clone(&notify));
                let inner = Arc::clone(self);
                let project = project_id.to_string();
                let lane_notify = Arc::clone(&notify);
                self.tasks
                    .spawn(async move { inner.run_lane(project, lane_notify).await });
                notify
            }
        };
        notify.notify_one();
    }

    async fn run_lane(self: Arc<Self>, project_id: String, notify: Arc<Notify>) {
        tracing::debug!(%project_id, "Lane worker started");
        loop {
            tokio::select! {
                () = notify.notified() => {}
                () = self.shutdown.cancelled() => break,
            }

            if let Err(e) = self.drain(&project_id).await {
                tracing::error!(%project_id, error = %e, "Lane admission failed, retrying later");
                tokio::select! {
                    () = tokio::time::sleep(LANE_RETRY_DELAY) => notify.notify_one(),
                    () = self.shutdown.cancelled() => break,
                }
            }
        }
        tracing::debug!(%project_id, "Lane worker stopped");
    }

    /// Admit jobs until the partition is idle
    async fn drain(self: &Arc<Self>, project_id: &str) -> IngestionResult<()> {
        while !self.shutdown.is_cancelled() {
            match self.admit_next(project_id).await? {
                Admission::Ran | Admission::Skipped => {}
                Admission::Busy | Admission::Idle => break,
            }
        }
        Ok(())
    }

    async fn admit_next(self: &Arc<Self>, project_id: &str) -> IngestionResult<Admission> {
        if let Some(job) = self.store.find_processing(project_id).await? {
            if self.cache.contains(&job.job_id) {
                return Ok(Admission::Busy);
            }
            self.fail_job(&job.job_id, &[JobStatus::Processing], RESTART_INTERRUPTED)
                .await?;
            return Ok(Admission::Skipped);
        }

        let Some(job) = self.store.find_oldest_pending(project_id).await? else {
            return Ok(Admission::Idle);
        };
        let Some(entry) = self.cache.get(&job.job_id) else {
            self.fail_job(&job.job_id, &[JobStatus::Pending], PAYLOAD_LOST)
                .await?;
            return Ok(Admission::Skipped);
        };

        self.run_job(&job, &entry).await?;
        Ok(Admission::Ran)
    }

    /// Phase 1 for one admitted job, then hand-off to Phase 2 or completion
    async fn run_job(
        self: &Arc<Self>,
        job: &IngestionJob,
        entry: &CachedPayload,
    ) -> IngestionResult<()> {
        let job_id = job.job_id;
        let admitted = self
            .store
            .transition_job(&job_id, &[JobStatus::Pending], JobStatus::Processing, None)
            .await?;
        if !admitted {
            self.cache.evict(&job_id);
            return Ok(());
        }

        tracing::info!(
            %job_id,
            project_id = %job.project_id,
            correlation_id = %job.correlation_id,
            "Phase 1 started"
        );

        let cancellation =
            JobCancellation::new(job_id, Arc::clone(&self.store), self.shutdown.clone());
        let loaded = self.load(job_id, entry, &cancellation).await;
        self.cache.evict(&job_id);

        let summary = match loaded {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(%job_id, error = %e, "Phase 1 failed");
                self.fail_job(&job_id, &[JobStatus::Processing], &e.to_string())
                    .await?;
                return Ok(());
            }
        };

        match summary.outcome {
            LoadOutcome::Cancelled | LoadOutcome::Interrupted => {}
            LoadOutcome::Completed if job.generate_embeddings => {
                let queued = self
                    .store
                    .transition_job(
                        &job_id,
                        &[JobStatus::Processing],
                        JobStatus::QueuedForVec,
                        None,
                    )
                    .await?;
                if queued {
                    self.spawn_vectorization(job_id, job.project_id.clone());
                }
            }
            LoadOutcome::Completed => {
                let completed = self
                    .store
                    .transition_job(
                        &job_id,
                        &[JobStatus::Processing],
                        JobStatus::Completed,
                        None,
                    )
                    .await?;
                if completed {
                    tracing::info!(%job_id, "Job completed");
                }
            }
        }
        Ok(())
    }

    async fn load(
        &self,
        job_id: Uuid,
        entry: &CachedPayload,
        cancellation: &JobCancellation,
    ) -> IngestionResult<LoadSummary> {
        let rows = self.parser.parse(&entry.payload).await?;
        self.store
            .set_total_records(&job_id, i64::try_from(rows.len()).unwrap_or(i64::MAX))
            .await?;
        self.loader
            .load(job_id, &rows, &entry.options, cancellation)
            .await
    }

    fn spawn_vectorization(self: &Arc<Self>, job_id: Uuid, project_id: String) {
        let inner = Arc::clone(self);
        self.tasks.spawn(async move {
            if let Err(e) = inner.vectorize(job_id, &project_id).await {
                tracing::error!(%job_id, error = %e, "Phase 2 failed");
                let failed = inner
                    .fail_job(
                        &job_id,
                        &[JobStatus::QueuedForVec, JobStatus::Vectorizing],
                        &e.to_string(),
                    )
                    .await;
                if let Err(e) = failed {
                    tracing::error!(%job_id, error = %e, "Could not record Phase 2 failure");
                }
            }
        });
    }

    /// Phase 2 under the partition's vector lock
    async fn vectorize(&self, job_id: Uuid, project_id: &str) -> IngestionResult<()> {
        let lane = Arc::clone(&*self.vector_lanes.entry(project_id.to_string()).or_default());
        let _guard = tokio::select! {
            guard = lane.lock_owned() => guard,
            () = self.shutdown.cancelled() => return Ok(()),
        };

        let started = self
            .store
            .transition_job(
                &job_id,
                &[JobStatus::QueuedForVec],
                JobStatus::Vectorizing,
                None,
            )
            .await?;
        if !started {
            return Ok(());
        }
        tracing::info!(%job_id, %project_id, "Phase 2 started");

        let cancellation =
            JobCancellation::new(job_id, Arc::clone(&self.store), self.shutdown.clone());
        let summary = self.vectorizer.run(job_id, project_id, &cancellation).await?;

        if summary.outcome == VectorizeOutcome::Completed {
            let completed = self
                .store
                .transition_job(
                    &job_id,
                    &[JobStatus::Vectorizing],
                    JobStatus::Completed,
                    None,
                )
                .await?;
            if completed {
                tracing::info!(
                    %job_id,
                    embedded = summary.embedded,
                    permanently_failed = summary.permanently_failed,
                    "Job completed"
                );
            }
        }
        Ok(())
    }

    /// Compare-and-set to FAILED, recording `message`
    async fn fail_job(
        &self,
        job_id: &Uuid,
        from: &[JobStatus],
        message: &str,
    ) -> IngestionResult<bool> {
        let failed = self
            .store
            .transition_job(job_id, from, JobStatus::Failed, Some(message))
            .await?;
        self.cache.evict(job_id);
        if failed {
            tracing::warn!(%job_id, error = message, "Job failed");
        }
        Ok(failed)
    }
}
