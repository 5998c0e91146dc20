//! Image grading endpoint.

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use marbling_core::{PredictionResult, RawImage};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Multipart field carrying the upload.
pub const IMAGE_FIELD: &str = "image";

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub status: &'static str,
    pub prediction: &'static str,
    pub confidence: f64,
    pub classification: &'static str,
    pub processing_time: f64,
    pub timestamp: String,
}

/// `POST /api/predict` with a multipart `image` field (PNG/JPEG).
pub async fn predict(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let start = Instant::now();
    let outcome = match multipart {
        Ok(multipart) => grade_upload(&state, multipart).await,
        Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
    };
    let processing_time = round_to(start.elapsed().as_secs_f64(), 2);

    match outcome {
        Ok(result) => {
            let response = PredictResponse {
                status: "success",
                prediction: result.grade.as_str(),
                confidence: round_to(f64::from(result.confidence), 3),
                classification: result.grade.classification(),
                processing_time,
                timestamp: Utc::now().to_rfc3339(),
            };
            info!(
                "graded {} (confidence {:.1}%, {}s)",
                response.classification,
                response.confidence * 100.0,
                processing_time
            );
            Json(response).into_response()
        }
        Err(err) => {
            err.log();
            err.into_timed_response(processing_time)
        }
    }
}

async fn grade_upload(state: &AppState, mut multipart: Multipart) -> ApiResult<PredictionResult> {
    let max_bytes = state.config.max_upload_bytes;
    let bytes = read_image_field(state, &mut multipart, max_bytes).await?;

    let normalizer = Arc::clone(&state.normalizer);
    let model = Arc::clone(&state.model);
    tokio::task::spawn_blocking(move || -> ApiResult<PredictionResult> {
        let raw = RawImage::decode(&bytes)?;
        debug!("decoded upload: {:?}", raw.summary());
        let tensor = normalizer.normalize(&raw)?;
        model
            .predict(&tensor)
            .map_err(|e| ApiError::Inference(format!("{e:#}")))
    })
    .await
    .map_err(|e| ApiError::internal(format!("prediction task failed: {e}")))?
}

async fn read_image_field(
    state: &AppState,
    multipart: &mut Multipart,
    max_bytes: usize,
) -> ApiResult<Bytes> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_bytes))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(ApiError::bad_request("no file selected"));
        }
        if !state.config.allows_file(&filename) {
            return Err(ApiError::bad_request(format!(
                "unsupported file type (allowed: {})",
                state.config.allowed_extensions.join(", ")
            )));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, max_bytes))?;
        debug!("received {filename} ({} bytes)", bytes.len());
        return Ok(bytes);
    }
    Err(ApiError::bad_request("no image file in request"))
}

fn multipart_error(err: MultipartError, max_bytes: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge { max_bytes }
    } else {
        ApiError::bad_request(err.body_text())
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::round_to;

    #[test]
    fn rounding_matches_response_precision() {
        assert_eq!(round_to(0.87654, 3), 0.877);
        assert_eq!(round_to(1.004, 2), 1.0);
    }
}
