//! Shared handler state

use std::sync::Arc;
use taskaudit_ingestion::JobScheduler;
use taskaudit_meta_data::PoolManager;
use taskaudit_upload::UploadAssembler;

/// Services built once at startup and cloned into every handler
#[derive(Clone)]
pub struct AppState {
    pub scheduler: JobScheduler,
    pub assembler: Arc<UploadAssembler>,
    /// Database pools, reported by `/health` and closed on shutdown
    pub pools: Option<PoolManager>,
}

impl AppState {
    pub const fn new(scheduler: JobScheduler, assembler: Arc<UploadAssembler>) -> Self {
        Self {
            scheduler,
            assembler,
            pools: None,
        }
    }

    #[must_use]
    pub fn with_pools(mut self, pools: PoolManager) -> Self {
        self.pools = Some(pools);
        self
    }
}
