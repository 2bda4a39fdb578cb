//! Combined store handle used across the pipeline

use taskaudit_meta_data::{JobRepository, RecordRepository};

/// Job and record stores behind one object
///
/// Both `DbRepository` and `MockRepository` implement it through the
/// blanket impl.
pub trait PipelineStore: JobRepository + RecordRepository {}

impl<T: JobRepository + RecordRepository + ?Sized> PipelineStore for T {}
