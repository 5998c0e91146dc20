//! Axum HTTP API for grading beef marbling from uploaded photos.
//!
//! Routes:
//! - `POST /api/predict`: grade a PNG/JPEG upload as `HIGH` or `LOW`
//! - `GET /api/health`, `GET /api/model/info`
//! - `GET /manifest.json` plus static PWA assets

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
