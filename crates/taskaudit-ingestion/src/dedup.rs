//! Duplicate Filter
//!
//! Point lookup of a row's external identifier within (partition, type).
//! Rows without an identifier are never duplicates.

use futures::future::join_all;
use std::sync::Arc;
use taskaudit_meta_data::{DatabaseResult, RecordRepository, RecordType};

use crate::store::PipelineStore;

#[derive(Clone)]
pub struct DuplicateFilter {
    records: Arc<dyn PipelineStore>,
}

impl DuplicateFilter {
    pub fn new(records: Arc<dyn PipelineStore>) -> Self {
        Self { records }
    }

    /// Whether a record with `external_id` already exists
    ///
    /// # Errors
    ///
    /// Returns the store error if the lookup fails
    pub async fn is_duplicate(
        &self,
        project_id: &str,
        record_type: RecordType,
        external_id: Option<&str>,
    ) -> DatabaseResult<bool> {
        match external_id {
            Some(id) => {
                self.records
                    .external_id_exists(project_id, record_type, id)
                    .await
            }
            None => Ok(false),
        }
    }

    /// Run one lookup per id concurrently; results keep input order
    ///
    /// A failed lookup only affects its own slot.
    pub async fn check_all(
        &self,
        project_id: &str,
        record_type: RecordType,
        external_ids: &[Option<String>],
    ) -> Vec<DatabaseResult<bool>> {
        join_all(
            external_ids
                .iter()
                .map(|id| self.is_duplicate(project_id, record_type, id.as_deref())),
        )
        .await
    }
}
