//! Payload Cache
//!
//! Holds each job's raw payload and options between enqueue and the end of
//! Phase 1. The cache is VOLATILE: nothing in it survives a restart, and no
//! caller may treat it as durable. The scheduler compensates by failing any
//! PENDING or PROCESSING job whose payload is gone.

use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::loader::IngestionOptions;
use crate::payload::IngestionPayload;

/// Payload and options of one queued job
#[derive(Debug, Clone)]
pub struct CachedPayload {
    pub payload: IngestionPayload,
    pub options: IngestionOptions,
}

/// Job id to cached payload; volatile, restart-unsafe
pub trait PayloadCache: Send + Sync {
    fn put(&self, job_id: Uuid, entry: CachedPayload);

    fn get(&self, job_id: &Uuid) -> Option<Arc<CachedPayload>>;

    fn contains(&self, job_id: &Uuid) -> bool;

    /// Drop an entry; returns whether one was present
    fn evict(&self, job_id: &Uuid) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local cache on a concurrent map
#[derive(Default)]
pub struct InMemoryPayloadCache {
    entries: DashMap<Uuid, Arc<CachedPayload>>,
}

impl InMemoryPayloadCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadCache for InMemoryPayloadCache {
    fn put(&self, job_id: Uuid, entry: CachedPayload) {
        self.entries.insert(job_id, Arc::new(entry));
    }

    fn get(&self, job_id: &Uuid) -> Option<Arc<CachedPayload>> {
        self.entries.get(job_id).map(|entry| Arc::clone(entry.value()))
    }

    fn contains(&self, job_id: &Uuid) -> bool {
        self.entries.contains_key(job_id)
    }

    fn evict(&self, job_id: &Uuid) -> bool {
        self.entries.remove(job_id).is_some()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskaudit_meta_data::RecordType;

    fn entry() -> CachedPayload {
        CachedPayload {
            payload: IngestionPayload::Csv("id,content\n".to_string()),
            options: IngestionOptions::new("p", RecordType::Task),
        }
    }

    #[test]
    fn test_put_get_evict() {
        let cache = InMemoryPayloadCache::new();
        let job_id = Uuid::new_v4();
        assert!(cache.is_empty());

        cache.put(job_id, entry());
        assert!(cache.contains(&job_id));
        assert_eq!(
            cache.get(&job_id).map(|e| e.options.project_id.clone()),
            Some("p".to_string())
        );

        assert!(cache.evict(&job_id));
        assert!(!cache.evict(&job_id));
        assert!(cache.get(&job_id).is_none());
    }
}
