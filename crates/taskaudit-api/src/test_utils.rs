//! In-memory application used by route tests

#![allow(clippy::unwrap_used)]

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use std::sync::Arc;
use std::time::Duration;
use taskaudit_config::IngestionConfig;
use taskaudit_embeddings::{DefaultEmbeddingService, MockEmbeddingProvider};
use taskaudit_ingestion::{InMemoryPayloadCache, JobScheduler, RecordType};
use taskaudit_meta_data::{JobRepository, MockRepository, NewJob, PoolManager};
use taskaudit_upload::UploadAssembler;
use tower::ServiceExt;
use uuid::Uuid;

use crate::routes::create_router;
use crate::state::AppState;

const TEST_BODY_LIMIT: usize = 1024 * 1024;

pub struct TestApp {
    pub repo: MockRepository,
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_session_limit(1024 * 1024)
    }

    pub fn with_session_limit(max_session_bytes: u64) -> Self {
        let repo = MockRepository::new();
        let embeddings = DefaultEmbeddingService::with_provider(
            Arc::new(MockEmbeddingProvider::new(4)),
            16,
            Duration::from_secs(5),
        );
        let scheduler = JobScheduler::new(
            Arc::new(repo.clone()),
            Arc::new(embeddings),
            Arc::new(InMemoryPayloadCache::new()),
            &IngestionConfig::default(),
        )
        .unwrap();
        let state = AppState::new(scheduler, Arc::new(UploadAssembler::new(max_session_bytes)));
        let router = create_router(state.clone(), TEST_BODY_LIMIT);
        Self {
            repo,
            state,
            router,
        }
    }

    /// Same app, with database pools attached to the state
    pub fn with_pools(pools: PoolManager) -> Self {
        let mut app = Self::new();
        app.state = app.state.clone().with_pools(pools);
        app.router = create_router(app.state.clone(), TEST_BODY_LIMIT);
        app
    }

    /// A PENDING job with no cached payload and no lane woken
    pub async fn pending_job(&self, project_id: &str) -> Uuid {
        self.repo
            .create_job(&NewJob {
                job_id: Uuid::new_v4(),
                project_id: project_id.to_string(),
                record_type: RecordType::Task,
                generate_embeddings: false,
                correlation_id: Uuid::new_v4(),
            })
            .await
            .unwrap()
            .job_id
    }

    /// Run one request; non-JSON bodies come back as `Value::Null`
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }
}

pub fn json_request(method: Method, uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub fn raw_request(method: Method, uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from(body))
        .unwrap()
}
