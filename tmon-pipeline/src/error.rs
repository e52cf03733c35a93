//! Error types for the pipeline
//!
//! [`PipelineError`] is what components hand each other; [`ApiError`] maps
//! it onto HTTP responses at the boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Failure inside the pipeline
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Malformed request: rejected at the boundary, never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Non-success response or transport failure on an outbound call
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Outbound call exceeded its time bound
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// The collaborator answered that the resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A key is already being monitored
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Every retry attempt against a destination failed
    #[error("Delivery to {destination} exhausted after {attempts} attempts: {last_error}")]
    DeliveryExhausted {
        destination: String,
        attempts: u32,
        last_error: String,
    },

    /// Topic extraction failed or returned an incomplete answer
    #[error("Compute failure: {0}")]
    Compute(String),
}

impl PipelineError {
    /// Whether RetryPolicy should try the call again
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Transient(_) | PipelineError::Timeout(_))
    }
}

impl From<tmon_common::Error> for PipelineError {
    fn from(err: tmon_common::Error) -> Self {
        match err {
            tmon_common::Error::InvalidInput(msg) => PipelineError::Validation(msg),
            tmon_common::Error::NotFound(msg) => PipelineError::NotFound(msg),
            other => PipelineError::Transient(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Transient(err.to_string())
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., key already monitored
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Upstream collaborator unreachable (502)
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(msg) => ApiError::BadRequest(msg),
            PipelineError::NotFound(msg) => ApiError::NotFound(msg),
            PipelineError::Conflict(msg) => ApiError::Conflict(msg),
            err @ (PipelineError::DeliveryExhausted { .. }
            | PipelineError::Transient(_)
            | PipelineError::Timeout(_)) => ApiError::Upstream(err.to_string()),
            PipelineError::Compute(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<tmon_common::Error> for ApiError {
    fn from(err: tmon_common::Error) -> Self {
        PipelineError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_FAILURE", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
