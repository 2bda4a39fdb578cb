//! Cooperative cancellation checkpoints
//!
//! Phase 1 checks before every batch and Phase 2 before every scan. A job
//! stops when its durable status says so (cancelled, failed elsewhere, or
//! deleted) or when the scheduler is shutting down.

use std::sync::Arc;
use taskaudit_meta_data::{JobRepository, JobStatus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::IngestionResult;
use crate::store::PipelineStore;

/// Result of one checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Continue,
    /// The job left its running state; stop and keep committed work
    Cancelled,
    /// Process shutdown; stop without touching the job's status
    Shutdown,
}

impl Checkpoint {
    pub const fn should_stop(self) -> bool {
        !matches!(self, Self::Continue)
    }
}

/// Cancellation handle for one job phase
#[derive(Clone)]
pub struct JobCancellation {
    job_id: Uuid,
    jobs: Arc<dyn PipelineStore>,
    shutdown: CancellationToken,
}

impl JobCancellation {
    pub fn new(job_id: Uuid, jobs: Arc<dyn PipelineStore>, shutdown: CancellationToken) -> Self {
        Self {
            job_id,
            jobs,
            shutdown,
        }
    }

    pub const fn job_id(&self) -> &Uuid {
        &self.job_id
    }

    pub const fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Re-read the job status and decide whether to keep going
    ///
    /// # Errors
    ///
    /// Returns the store error if the status cannot be read
    pub async fn check(&self) -> IngestionResult<Checkpoint> {
        if self.shutdown.is_cancelled() {
            return Ok(Checkpoint::Shutdown);
        }
        match self.jobs.get_job_status(&self.job_id).await? {
            Some(JobStatus::Processing | JobStatus::Vectorizing) => Ok(Checkpoint::Continue),
            Some(status) => {
                tracing::info!(job_id = %self.job_id, %status, "Job stopped at checkpoint");
                Ok(Checkpoint::Cancelled)
            }
            None => {
                tracing::warn!(job_id = %self.job_id, "Job vanished at checkpoint");
                Ok(Checkpoint::Cancelled)
            }
        }
    }
}
