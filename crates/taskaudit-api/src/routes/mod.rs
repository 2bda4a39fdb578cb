pub mod health;
pub mod jobs;
pub mod uploads;

use axum::{Router, extract::DefaultBodyLimit, middleware};

use crate::state::AppState;

/// Every route, with correlation ids and a request body cap of `body_limit` bytes
pub fn create_router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(uploads::routes())
        .merge(jobs::routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(crate::middleware::correlation_id_middleware))
}
