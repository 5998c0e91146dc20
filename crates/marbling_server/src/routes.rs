//! API routes.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::handler::HandlerWithoutStateExt;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::handlers::{health, manifest, model_info, not_found, predict};
use crate::state::AppState;

/// Create the application router.
///
/// Files under `static_dir` are served below `/static`, and `/` serves its
/// `index.html`.
pub fn create_router(state: AppState) -> Router {
    let static_dir = &state.config.static_dir;
    let assets = ServeDir::new(static_dir).not_found_service(not_found.into_service());
    let index = ServeFile::new(static_dir.join("index.html"));

    Router::new()
        .route("/api/predict", post(predict))
        .route("/api/health", get(health))
        .route("/api/model/info", get(model_info))
        .route("/manifest.json", get(manifest))
        .route_service("/", index)
        .nest_service("/static", assets)
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(cors_layer(&state.config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("ignoring invalid CORS origin {o:?}");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
