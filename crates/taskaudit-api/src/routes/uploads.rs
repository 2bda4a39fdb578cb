//! Upload routes
//!
//! - `POST /uploads` - inline payload, enqueued at once
//! - `PUT /uploads/{session_id}/chunks/{index}` - one raw chunk
//! - `POST /uploads/{session_id}/complete` - assemble the session and enqueue it
//! - `DELETE /uploads/{session_id}` - drop a half-finished session
//! - `POST /endpoints` - enqueue a job whose rows are fetched from a URL

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post, put},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use taskaudit_common::CorrelationId;
use taskaudit_ingestion::{EndpointSource, IngestionOptions, IngestionPayload, RecordType};
use taskaudit_upload::protocol::SINGLE_UPLOAD_PATH;
use taskaudit_upload::{
    CompleteRequest, PayloadFormat, SingleUploadRequest, UploadMetadata, UploadReceipt,
};

use crate::middleware::RequestContext;
use crate::state::AppState;
use crate::{ApiError, ApiResult};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(SINGLE_UPLOAD_PATH, post(upload_single))
        .route("/uploads/{session_id}/chunks/{index}", put(upload_chunk))
        .route("/uploads/{session_id}/complete", post(complete_upload))
        .route("/uploads/{session_id}", delete(abort_upload))
        .route("/endpoints", post(ingest_endpoint))
}

/// Job request whose rows live behind a URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointRequest {
    pub project_id: String,
    pub record_type: RecordType,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub generate_embeddings: bool,
    pub endpoint: EndpointSource,
}

fn ingestion_options(
    project_id: &str,
    record_type: RecordType,
    source: Option<&str>,
    keywords: &[String],
    generate_embeddings: bool,
    correlation_id: CorrelationId,
) -> ApiResult<IngestionOptions> {
    if project_id.trim().is_empty() {
        return Err(ApiError::validation("project_id must not be empty", correlation_id));
    }
    let options = IngestionOptions::new(project_id.trim(), record_type)
        .with_keywords(keywords.iter().cloned())
        .with_embeddings(generate_embeddings)
        .with_correlation_id(*correlation_id.as_uuid());
    Ok(match source {
        Some(source) => options.with_source(source),
        None => options,
    })
}

fn metadata_options(
    metadata: &UploadMetadata,
    correlation_id: CorrelationId,
) -> ApiResult<IngestionOptions> {
    ingestion_options(
        &metadata.project_id,
        metadata.record_type,
        metadata.source.as_deref(),
        &metadata.keywords,
        metadata.generate_embeddings,
        correlation_id,
    )
}

fn inline_payload(format: PayloadFormat, content: String) -> IngestionPayload {
    match format {
        PayloadFormat::Csv => IngestionPayload::Csv(content),
        PayloadFormat::Json => IngestionPayload::Json(content),
    }
}

async fn enqueue(
    state: &AppState,
    payload: IngestionPayload,
    options: IngestionOptions,
    correlation_id: CorrelationId,
) -> ApiResult<(StatusCode, Json<UploadReceipt>)> {
    let job_id = state
        .scheduler
        .enqueue(payload, options)
        .await
        .map_err(|e| ApiError::from_ingestion(e, correlation_id))?;
    tracing::info!(%correlation_id, %job_id, "Upload accepted");
    Ok((StatusCode::ACCEPTED, Json(UploadReceipt { job_id })))
}

async fn upload_single(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<SingleUploadRequest>,
) -> ApiResult<(StatusCode, Json<UploadReceipt>)> {
    let correlation_id = context.correlation_id;
    let options = metadata_options(&request.metadata, correlation_id)?;
    let payload = inline_payload(request.metadata.format, request.content);
    enqueue(&state, payload, options, correlation_id).await
}

async fn upload_chunk(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path((session_id, index)): Path<(String, u32)>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    state
        .assembler
        .accept_chunk(&session_id, index, body)
        .map_err(|e| ApiError::from_upload(e, context.correlation_id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn complete_upload(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(session_id): Path<String>,
    Json(request): Json<CompleteRequest>,
) -> ApiResult<(StatusCode, Json<UploadReceipt>)> {
    let correlation_id = context.correlation_id;
    let options = metadata_options(&request.metadata, correlation_id)?;
    let assembled = state
        .assembler
        .complete(&session_id, request.total_chunks)
        .map_err(|e| ApiError::from_upload(e, correlation_id))?;
    let payload = inline_payload(request.metadata.format, assembled.content);
    enqueue(&state, payload, options, correlation_id).await
}

async fn abort_upload(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.assembler.abort(&session_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(
            format!("Upload session {session_id}"),
            context.correlation_id,
        ))
    }
}

async fn ingest_endpoint(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<EndpointRequest>,
) -> ApiResult<(StatusCode, Json<UploadReceipt>)> {
    let correlation_id = context.correlation_id;
    let options = ingestion_options(
        &request.project_id,
        request.record_type,
        request.source.as_deref(),
        &request.keywords,
        request.generate_embeddings,
        correlation_id,
    )?;
    if request.endpoint.url.trim().is_empty() {
        return Err(ApiError::validation("endpoint.url must not be empty", correlation_id));
    }
    enqueue(
        &state,
        IngestionPayload::Endpoint(request.endpoint),
        options,
        correlation_id,
    )
    .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{TestApp, json_request, raw_request};
    use axum::http::Method;
    use serde_json::json;
    use std::time::Duration;
    use taskaudit_ingestion::JobStatus;
    use uuid::Uuid;

    fn metadata() -> serde_json::Value {
        json!({
            "project_id": "alpha",
            "record_type": "TASK",
            "format": "csv",
        })
    }

    #[tokio::test]
    async fn test_single_upload_creates_job_that_completes() {
        let app = TestApp::new();
        let body = json!({
            "metadata": metadata(),
            "content": "id,title\n1,Fix the login page\n2,Write release notes\n",
        });

        let (status, receipt) = app
            .send(json_request(Method::POST, "/uploads", &body))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let job_id: Uuid = serde_json::from_value(receipt["job_id"].clone()).unwrap();
        let job = app
            .state
            .scheduler
            .wait_for_terminal(&job_id, Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.saved_count, 2);
    }

    #[tokio::test]
    async fn test_request_correlation_id_is_stored_on_job() {
        let app = TestApp::new();
        let correlation_id = Uuid::new_v4();
        let mut request = json_request(
            Method::POST,
            "/uploads",
            &json!({ "metadata": metadata(), "content": "id,title\n1,Archive old tickets\n" }),
        );
        request.headers_mut().insert(
            crate::error::CORRELATION_HEADER,
            correlation_id.to_string().parse().unwrap(),
        );

        let (status, receipt) = app.send(request).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let job_id: Uuid = serde_json::from_value(receipt["job_id"].clone()).unwrap();
        let job = app.state.scheduler.get_status(&job_id).await.unwrap();
        assert_eq!(job.correlation_id, correlation_id);
    }

    #[tokio::test]
    async fn test_chunked_upload_is_assembled_and_enqueued() {
        let app = TestApp::new();
        let content = b"id,title\n1,Rotate the API keys\n";
        let (first, second) = content.split_at(12);

        for (index, part) in [first, second].into_iter().enumerate() {
            let (status, _) = app
                .send(raw_request(
                    Method::PUT,
                    &format!("/uploads/s1/chunks/{index}"),
                    part.to_vec(),
                ))
                .await;
            assert_eq!(status, StatusCode::NO_CONTENT);
        }

        let (status, receipt) = app
            .send(json_request(
                Method::POST,
                "/uploads/s1/complete",
                &json!({ "metadata": metadata(), "total_chunks": 2 }),
            ))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(app.state.assembler.session_count(), 0);

        let job_id: Uuid = serde_json::from_value(receipt["job_id"].clone()).unwrap();
        let job = app
            .state
            .scheduler
            .wait_for_terminal(&job_id, Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(job.saved_count, 1);
    }

    #[tokio::test]
    async fn test_complete_with_gap_is_client_error() {
        let app = TestApp::new();
        app.send(raw_request(Method::PUT, "/uploads/s2/chunks/1", b"tail".to_vec()))
            .await;

        let (status, body) = app
            .send(json_request(
                Method::POST,
                "/uploads/s2/complete",
                &json!({ "metadata": metadata(), "total_chunks": 2 }),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_unknown_session_and_abort() {
        let app = TestApp::new();
        let (status, _) = app
            .send(raw_request(Method::DELETE, "/uploads/missing", Vec::new()))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        app.send(raw_request(Method::PUT, "/uploads/s3/chunks/0", b"x".to_vec()))
            .await;
        let (status, _) = app
            .send(raw_request(Method::DELETE, "/uploads/s3", Vec::new()))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(app.state.assembler.session_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_project_is_rejected() {
        let app = TestApp::new();
        let body = json!({
            "metadata": { "project_id": "  ", "record_type": "TASK", "format": "csv" },
            "content": "id\n1\n",
        });
        let (status, _) = app
            .send(json_request(Method::POST, "/uploads", &body))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oversized_chunk_session_is_rejected() {
        let app = TestApp::with_session_limit(8);
        let (status, _) = app
            .send(raw_request(
                Method::PUT,
                "/uploads/big/chunks/0",
                b"0123456789".to_vec(),
            ))
            .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }
}
