//! Job routes
//!
//! - `GET /jobs?project_id=..&limit=..` - newest jobs of a partition
//! - `GET /jobs/{job_id}` - one job with its counters
//! - `POST /jobs/{job_id}/cancel` - cooperative cancellation
//! - `DELETE /jobs/{job_id}` - remove a finished job and its records

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use taskaudit_ingestion::IngestionJob;
use uuid::Uuid;

use crate::middleware::RequestContext;
use crate::state::AppState;
use crate::{ApiError, ApiResult};

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 200;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/{job_id}", get(get_job).delete(delete_job))
        .route("/jobs/{job_id}/cancel", post(cancel_job))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub project_id: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    /// False when the job had already failed or been cancelled
    pub cancelled: bool,
}

async fn list_jobs(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<IngestionJob>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let jobs = state
        .scheduler
        .list_recent(&query.project_id, limit)
        .await
        .map_err(|e| ApiError::from_ingestion(e, context.correlation_id))?;
    Ok(Json(jobs))
}

async fn get_job(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<IngestionJob>> {
    state
        .scheduler
        .get_status(&job_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_ingestion(e, context.correlation_id))
}

async fn cancel_job(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    let cancelled = state
        .scheduler
        .cancel(&job_id)
        .await
        .map_err(|e| ApiError::from_ingestion(e, context.correlation_id))?;
    Ok(Json(CancelResponse { job_id, cancelled }))
}

async fn delete_job(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .scheduler
        .delete_job(&job_id)
        .await
        .map_err(|e| ApiError::from_ingestion(e, context.correlation_id))?;
    Ok(StatusCode::NO_CONTENT)
}
