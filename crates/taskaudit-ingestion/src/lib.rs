//! Ingestion and vectorization pipeline for Taskaudit
//!
//! Phase 1 (`loader`) turns an uploaded payload into durable records;
//! Phase 2 (`vectorizer`) attaches embeddings to them. The `scheduler`
//! admits jobs one at a time per partition and drives both phases.

pub mod cancellation;
pub mod classifier;
pub mod dedup;
pub mod error;
pub mod loader;
pub mod payload;
pub mod payload_cache;
pub mod scheduler;
pub mod store;
pub mod vectorizer;

pub use cancellation::{Checkpoint, JobCancellation};
pub use classifier::{Classification, ContentClassifier, Provenance};
pub use dedup::DuplicateFilter;
pub use error::{IngestionError, IngestionResult};
pub use loader::{ChunkLoader, IngestionOptions, LoadOutcome, LoadSummary};
pub use payload::{EndpointSource, IngestionPayload, PayloadParser};
pub use payload_cache::{CachedPayload, InMemoryPayloadCache, PayloadCache};
pub use scheduler::{JobScheduler, RecoveryReport};
pub use store::PipelineStore;
pub use vectorizer::{VectorizeOutcome, VectorizeSummary, Vectorizer, VectorizerConfig};

// Re-export the types callers need alongside the scheduler
pub use taskaudit_meta_data::{IngestionJob, JobStatus, QualityCategory, RecordType};
