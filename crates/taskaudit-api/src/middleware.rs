//! Request correlation
//!
//! Reuses the caller's `x-correlation-id` when it parses as a UUID, otherwise
//! mints one. Handlers read it from the [`RequestContext`] extension and the
//! value is echoed on every response.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use taskaudit_common::CorrelationId;

use crate::error::CORRELATION_HEADER;

#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub correlation_id: CorrelationId,
}

pub async fn correlation_id_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map_or_else(CorrelationId::new, CorrelationId::from);

    request
        .extensions_mut()
        .insert(RequestContext { correlation_id });

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}
