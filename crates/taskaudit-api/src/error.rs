//! Structured API errors
//!
//! Every variant carries the request's correlation id, which is echoed in
//! the JSON body and the `X-Correlation-ID` header. Internal failures are
//! logged in full but reach the client only as a generic message.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use taskaudit_common::CorrelationId;
use taskaudit_ingestion::IngestionError;
use taskaudit_upload::UploadError;
use thiserror::Error;
use tracing::{error, warn};

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or inconsistent request
    #[error("Request validation failed: {message} (correlation: {correlation_id})")]
    ValidationError {
        message: String,
        correlation_id: CorrelationId,
    },

    #[error("{resource} not found (correlation: {correlation_id})")]
    ResourceNotFound {
        resource: String,
        correlation_id: CorrelationId,
    },

    /// The request conflicts with the resource's current state
    #[error("{message} (correlation: {correlation_id})")]
    Conflict {
        message: String,
        correlation_id: CorrelationId,
    },

    #[error("{message} (correlation: {correlation_id})")]
    PayloadTooLarge {
        message: String,
        correlation_id: CorrelationId,
    },

    #[error(
        "Service temporarily unavailable. Retry after {retry_after_seconds}s (correlation: {correlation_id})"
    )]
    ServiceUnavailable {
        retry_after_seconds: u64,
        correlation_id: CorrelationId,
    },

    #[error("Internal server error (correlation: {correlation_id})")]
    InternalServerError {
        detail: String,
        correlation_id: CorrelationId,
    },
}

/// JSON body of an error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    pub correlation_id: CorrelationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub const fn correlation_id(&self) -> &CorrelationId {
        match self {
            Self::ValidationError { correlation_id, .. }
            | Self::ResourceNotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::PayloadTooLarge { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::InternalServerError { correlation_id, .. } => correlation_id,
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError { .. } => StatusCode::BAD_REQUEST,
            Self::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalServerError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    const fn code(&self) -> &'static str {
        match self {
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::ResourceNotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            Self::InternalServerError { .. } => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn validation(message: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self::ValidationError {
            message: message.into(),
            correlation_id,
        }
    }

    pub fn not_found(resource: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self::ResourceNotFound {
            resource: resource.into(),
            correlation_id,
        }
    }

    /// Map a pipeline error onto its HTTP category
    pub fn from_ingestion(err: IngestionError, correlation_id: CorrelationId) -> Self {
        match err {
            IngestionError::JobNotFound { job_id } => {
                Self::not_found(format!("Job {job_id}"), correlation_id)
            }
            IngestionError::AlreadyCompleted { .. } | IngestionError::JobActive { .. } => {
                Self::Conflict {
                    message: err.to_string(),
                    correlation_id,
                }
            }
            IngestionError::PayloadTooLarge { .. } => Self::PayloadTooLarge {
                message: err.to_string(),
                correlation_id,
            },
            IngestionError::PayloadParse { .. } => Self::validation(err.to_string(), correlation_id),
            IngestionError::ShuttingDown => Self::ServiceUnavailable {
                retry_after_seconds: 30,
                correlation_id,
            },
            IngestionError::Endpoint { .. }
            | IngestionError::Database(_)
            | IngestionError::Configuration(_) => Self::InternalServerError {
                detail: err.to_string(),
                correlation_id,
            },
        }
    }

    /// Map an assembler error onto its HTTP category
    pub fn from_upload(err: UploadError, correlation_id: CorrelationId) -> Self {
        match err {
            UploadError::UnknownSession { session_id } => {
                Self::not_found(format!("Upload session {session_id}"), correlation_id)
            }
            UploadError::SessionTooLarge { .. } => Self::PayloadTooLarge {
                message: err.to_string(),
                correlation_id,
            },
            UploadError::TooManySessions { .. } => Self::ServiceUnavailable {
                retry_after_seconds: 10,
                correlation_id,
            },
            UploadError::MissingChunks { .. }
            | UploadError::UnexpectedChunk { .. }
            | UploadError::InvalidUtf8(_) => Self::validation(err.to_string(), correlation_id),
            UploadError::Rejected { .. }
            | UploadError::RetriesExhausted { .. }
            | UploadError::InvalidResponse(_)
            | UploadError::Io(_)
            | UploadError::Configuration(_) => Self::InternalServerError {
                detail: err.to_string(),
                correlation_id,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let correlation_id = *self.correlation_id();

        match &self {
            Self::InternalServerError { detail, .. } => {
                error!(%correlation_id, error = %detail, "Internal server error");
            }
            Self::ServiceUnavailable { .. } => {
                warn!(%correlation_id, error = %self, "Service unavailable");
            }
            _ => {
                warn!(%correlation_id, error = %self, "Client error");
            }
        }

        let body = ApiErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
            correlation_id,
            retry_after: match &self {
                Self::ServiceUnavailable {
                    retry_after_seconds,
                    ..
                } => Some(*retry_after_seconds),
                _ => None,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Ok(value) = correlation_id.to_string().parse() {
            response.headers_mut().insert(CORRELATION_HEADER, value);
        }
        response
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
