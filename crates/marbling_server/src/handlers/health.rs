//! Health and model information handlers.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use marbling_core::ModelInfo;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub components: Components,
    pub model_info: ModelInfo,
}

#[derive(Serialize)]
pub struct Components {
    pub model: bool,
    pub normalizer: bool,
}

#[derive(Serialize)]
pub struct ModelInfoResponse {
    pub status: &'static str,
    pub model_info: ModelInfo,
}

/// Liveness probe. The model and normalizer exist for the whole process
/// lifetime, so reaching this handler means both are ready.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
        components: Components {
            model: true,
            normalizer: true,
        },
        model_info: state.model.info(),
    })
}

pub async fn model_info(State(state): State<AppState>) -> Json<ModelInfoResponse> {
    Json(ModelInfoResponse {
        status: "success",
        model_info: state.model.info(),
    })
}
