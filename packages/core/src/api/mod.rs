pub mod fetch;
pub mod health;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::metrics::{metrics_handler, track_http, AppMetrics};
use crate::monitor::SnapshotService;

pub const AVAILABLE_ENDPOINTS: &[&str] = &["/", "/fetch", "/health", "/metrics"];

/// Assemble the full HTTP surface.
pub fn create_router(service: Arc<SnapshotService>, metrics: Arc<AppMetrics>) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics.clone());

    Router::new()
        .route("/", get(api_docs))
        .route("/health", get(health::health))
        .merge(fetch::create_fetch_router(service))
        .merge(metrics_router)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(metrics, track_http))
        .layer(CorsLayer::permissive())
}

/// `GET /`
pub async fn api_docs() -> impl IntoResponse {
    Json(json!({
        "name": "Child Publishers API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/": "API documentation",
            "/fetch?network_code=<code>": "Fetch child publishers for network (cached)",
            "/fetch?network_code=<code>&refresh=true": "Force fresh fetch from Ad Manager",
            "/health": "Health check",
            "/metrics": "Prometheus metrics",
        },
        "usage": {
            "example_1": "/fetch?network_code=23033612553",
            "example_2": "/fetch?network_code=23033612553&refresh=true",
        },
    }))
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "Endpoint not found",
            "available_endpoints": AVAILABLE_ENDPOINTS,
        })),
    )
}
