use axum::{Extension, Json, Router, extract::State, routing::get};
use serde_json::json;
use taskaudit_meta_data::PoolManager;

use crate::middleware::RequestContext;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
) -> Json<serde_json::Value> {
    tracing::debug!(correlation_id = %context.correlation_id, "Health check request");
    let mut body = json!({
        "status": "healthy",
        "service": "taskaudit-api",
        "correlation_id": context.correlation_id.to_string(),
        "upload_sessions": state.assembler.session_count(),
    });
    if let Some(pools) = &state.pools {
        body["database"] = pool_report(pools);
    }
    Json(body)
}

fn pool_report(pools: &PoolManager) -> serde_json::Value {
    let stats = pools.stats();
    json!({
        "connections": stats.total_connections(),
        "idle": stats.total_idle(),
        "utilization_percent": stats.utilization(),
        "write_pool_max": stats.write_pool.max,
        "read_pool_max": stats.read_pool.max,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::error::CORRELATION_HEADER;
    use crate::test_utils::TestApp;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use taskaudit_meta_data::PoolManager;

    #[tokio::test]
    async fn test_health_echoes_caller_correlation_id() {
        let app = TestApp::new();
        let id = "6f1c2a3e-8d4b-4c5a-9e7f-0a1b2c3d4e5f";
        let request = Request::builder()
            .uri("/health")
            .header(CORRELATION_HEADER, id)
            .body(Body::empty())
            .unwrap();

        let (status, body) = app.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["correlation_id"], id);
        assert!(body.get("database").is_none());
    }

    #[tokio::test]
    async fn test_health_reports_pool_usage() {
        let options = PgConnectOptions::new()
            .host("localhost")
            .database("taskaudit");
        let pool = PgPoolOptions::new()
            .max_connections(3)
            .connect_lazy_with(options);
        let app = TestApp::with_pools(PoolManager::from_pool(pool));

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let (status, body) = app.send(request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"]["connections"], 0);
        assert_eq!(body["database"]["write_pool_max"], 3);
        assert_eq!(body["upload_sessions"], 0);
    }
}
