//! HTTP surface of the ingestion pipeline
//!
//! Receives single and chunked uploads, turns them into scheduler jobs and
//! exposes job status, listing, cancellation and deletion.

pub mod bootstrap;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

#[cfg(test)]
pub mod test_utils;

pub use error::{ApiError, ApiErrorResponse, ApiResult};
pub use middleware::{RequestContext, correlation_id_middleware};
pub use routes::create_router;
pub use state::AppState;
