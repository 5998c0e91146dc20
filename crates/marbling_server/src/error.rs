//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use marbling_core::NormalizationError;
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("file too large (max {max_bytes} bytes)")]
    PayloadTooLarge { max_bytes: usize },

    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Normalization(e) if e.is_input_error() => StatusCode::BAD_REQUEST,
            ApiError::Normalization(_) | ApiError::Inference(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Bugs are logged as errors, bad uploads as warnings.
    pub fn log(&self) {
        match self {
            ApiError::Normalization(e) if !e.is_input_error() => {
                tracing::error!(defect = true, "normalizer produced an invalid tensor: {e}");
            }
            ApiError::Inference(_) | ApiError::Internal(_) => tracing::error!("{self}"),
            _ => tracing::warn!("rejected request: {self}"),
        }
    }

    /// Error response that also reports how long the request took.
    pub fn into_timed_response(self, processing_time: f64) -> Response {
        self.respond(Some(processing_time))
    }

    fn respond(self, processing_time: Option<f64>) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            status: "error",
            message: self.to_string(),
            processing_time,
            timestamp: Utc::now().to_rfc3339(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    processing_time: Option<f64>,
    timestamp: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.respond(None)
    }
}
