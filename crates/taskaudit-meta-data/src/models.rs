//! Domain models for the job and record stores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Skip-reason label to number of rows skipped for that reason
pub type SkippedDetails = BTreeMap<String, i64>;

/// One ingestion attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub job_id: Uuid,
    /// Partition the job loads into
    pub project_id: String,
    pub record_type: RecordType,
    pub status: JobStatus,

    /// Best-effort; 0 until the payload has been parsed
    pub total_records: i64,
    pub saved_count: i64,
    pub skipped_count: i64,
    pub skipped_details: SkippedDetails,

    pub embedded_count: i64,
    pub embedding_failed_count: i64,

    /// Set only when the job FAILED
    pub error_message: Option<String>,
    pub generate_embeddings: bool,
    pub correlation_id: Uuid,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for a new PENDING job
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Chosen by the caller so side state can be keyed before the row exists
    pub job_id: Uuid,
    pub project_id: String,
    pub record_type: RecordType,
    pub generate_embeddings: bool,
    pub correlation_id: Uuid,
}

/// Job lifecycle
///
/// `PENDING -> PROCESSING -> [QUEUED_FOR_VEC -> VECTORIZING] -> COMPLETED`,
/// with `FAILED` and `CANCELLED` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    QueuedForVec,
    Vectorizing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Every status a job can still leave
    pub const ACTIVE: [Self; 4] = [
        Self::Pending,
        Self::Processing,
        Self::QueuedForVec,
        Self::Vectorizing,
    ];

    /// Completed, failed or cancelled
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::QueuedForVec => "QUEUED_FOR_VEC",
            Self::Vectorizing => "VECTORIZING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "QUEUED_FOR_VEC" => Ok(Self::QueuedForVec),
            "VECTORIZING" => Ok(Self::Vectorizing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of content a job ingests
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    Task,
    Feedback,
}

impl RecordType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Task => "TASK",
            Self::Feedback => "FEEDBACK",
        }
    }
}

impl std::str::FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TASK" => Ok(Self::Task),
            "FEEDBACK" => Ok(Self::Feedback),
            _ => Err(format!("Invalid record type: {s}")),
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality label derived from rating-like row fields
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityCategory {
    #[serde(rename = "TOP_10")]
    Top10,
    #[serde(rename = "BOTTOM_10")]
    Bottom10,
}

impl QualityCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Top10 => "TOP_10",
            Self::Bottom10 => "BOTTOM_10",
        }
    }
}

impl std::str::FromStr for QualityCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TOP_10" => Ok(Self::Top10),
            "BOTTOM_10" => Ok(Self::Bottom10),
            _ => Err(format!("Invalid quality category: {s}")),
        }
    }
}

impl std::fmt::Display for QualityCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a record stands in Phase 2
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmbeddingState {
    /// No embedding yet; eligible for the next scan
    Pending,
    Done,
    /// Retried to exhaustion; never scanned again
    PermanentlyFailed,
}

impl EmbeddingState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Done => "DONE",
            Self::PermanentlyFailed => "PERMANENTLY_FAILED",
        }
    }
}

impl std::str::FromStr for EmbeddingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "DONE" => Ok(Self::Done),
            "PERMANENTLY_FAILED" => Ok(Self::PermanentlyFailed),
            _ => Err(format!("Invalid embedding state: {s}")),
        }
    }
}

impl std::fmt::Display for EmbeddingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ingested content unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    /// Job that created the record
    pub job_id: Option<Uuid>,
    pub project_id: String,
    pub record_type: RecordType,
    /// Row-provided key used for duplicate suppression
    pub external_id: Option<String>,
    /// The source row, verbatim
    pub metadata: serde_json::Value,
    pub content: String,
    pub category: Option<QualityCategory>,
    pub embedding: Option<Vec<f32>>,
    pub embedding_state: EmbeddingState,

    // Provenance
    pub source: Option<String>,
    pub creator_id: Option<String>,
    pub creator_name: Option<String>,
    pub creator_email: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Record ready for insertion
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub job_id: Option<Uuid>,
    pub project_id: String,
    pub record_type: RecordType,
    pub external_id: Option<String>,
    pub metadata: serde_json::Value,
    pub content: String,
    pub category: Option<QualityCategory>,
    pub source: Option<String>,
    pub creator_id: Option<String>,
    pub creator_name: Option<String>,
    pub creator_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Record still waiting for an embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingCandidate {
    pub id: i64,
    pub content: String,
}

/// Progress produced by one Phase 1 batch; merged additively into the job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchProgress {
    pub saved: i64,
    pub skipped: i64,
    pub skipped_details: SkippedDetails,
}

impl BatchProgress {
    /// Tally one skipped row under `reason`
    pub fn skip(&mut self, reason: &str) {
        self.skipped = self.skipped.saturating_add(1);
        let count = self.skipped_details.entry(reason.to_string()).or_insert(0);
        *count = count.saturating_add(1);
    }

    /// Add another batch's progress into this one
    pub fn merge(&mut self, other: &Self) {
        self.saved = self.saved.saturating_add(other.saved);
        self.skipped = self.skipped.saturating_add(other.skipped);
        merge_skipped_details(&mut self.skipped_details, &other.skipped_details);
    }
}

/// Additive merge of skip counts; existing reasons are never reset
pub fn merge_skipped_details(into: &mut SkippedDetails, from: &SkippedDetails) {
    for (reason, count) in from {
        let entry = into.entry(reason.clone()).or_insert(0);
        *entry = entry.saturating_add(*count);
    }
}

/// Record totals for one partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub total: i64,
    pub embedded: i64,
    pub pending: i64,
    pub permanently_failed: i64,
}
