//! PWA manifest and fallback responses.

use axum::Json;
use serde_json::{Value, json};

use crate::error::ApiError;

pub async fn manifest() -> Json<Value> {
    Json(json!({
        "name": "牛肉マーブリング判定システム",
        "short_name": "牛肉判定",
        "description": "上カルビ/並カルビの即座判定",
        "start_url": "/",
        "display": "standalone",
        "theme_color": "#2c3e50",
        "background_color": "#ecf0f1",
        "orientation": "portrait",
        "icons": [
            {
                "src": "/static/icons/icon-192.png",
                "sizes": "192x192",
                "type": "image/png"
            },
            {
                "src": "/static/icons/icon-512.png",
                "sizes": "512x512",
                "type": "image/png"
            }
        ]
    }))
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("requested resource not found")
}
