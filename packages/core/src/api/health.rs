use axum::{
    http::{header, HeaderValue},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;

pub async fn health() -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        Json(json!({
            "status": "healthy",
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}
