use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::ingest::IngestError;

/// Error returned by every HTTP handler
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded {
        message: String,
        retry_after: Duration,
    },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(e) => AppError::BadRequest(e.to_string()),
            IngestError::RateLimited { retry_after } => AppError::RateLimitExceeded {
                message: "Please wait before placing another pixel".to_string(),
                retry_after,
            },
            IngestError::QueueFull { .. } => {
                AppError::ServiceUnavailable("Queue is full. Please try again".to_string())
            }
            IngestError::ShuttingDown => {
                AppError::ServiceUnavailable("Server is shutting down".to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut retry_after_secs = None;
        let (status, error_message, code) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "BAD_REQUEST"),
            AppError::RateLimitExceeded {
                message,
                retry_after,
            } => {
                // Whole seconds, rounded up so an immediate retry is never early.
                let secs = retry_after.as_millis().div_ceil(1000).max(1) as u64;
                retry_after_secs = Some(secs);
                (StatusCode::TOO_MANY_REQUESTS, message, "RATE_LIMIT_EXCEEDED")
            }
            AppError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                msg,
                "SERVICE_UNAVAILABLE",
            ),
            AppError::InternalError(err) => {
                tracing::error!(error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "INTERNAL_ERROR",
                )
            }
        };

        let body = Json(json!({
            "error": code,
            "message": error_message
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
