use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AppError;
use crate::model::{NetworkCode, Record};
use crate::monitor::{ServedSnapshot, SnapshotService, Source};

/// Shared state type for the fetch route.
pub type FetchState = Arc<SnapshotService>;

pub fn create_fetch_router(service: FetchState) -> Router {
    Router::new()
        .route("/fetch", get(fetch_children))
        .with_state(service)
}

#[derive(Debug, Default, Deserialize)]
pub struct FetchQuery {
    pub network_code: Option<String>,
    #[serde(rename = "networkCode")]
    pub network_code_alias: Option<String>,
    pub refresh: Option<String>,
}

impl FetchQuery {
    fn code(&self) -> Option<&str> {
        self.network_code
            .as_deref()
            .filter(|code| !code.is_empty())
            .or(self.network_code_alias.as_deref())
            .filter(|code| !code.is_empty())
    }

    /// Only the literal `true` (any case) forces a refetch.
    fn force_refresh(&self) -> bool {
        self.refresh
            .as_deref()
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Serialize)]
pub struct FetchResponse {
    pub success: bool,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_hours_ago: Option<f64>,
    pub network_code: String,
    pub total_count: usize,
    pub fetched_at: String,
    pub children: Vec<Record>,
    pub message: String,
}

impl From<ServedSnapshot> for FetchResponse {
    fn from(served: ServedSnapshot) -> Self {
        let message = match served.cached_hours_ago {
            Some(hours) => format!(
                "Data from cache ({:.1} hours old). Add &refresh=true to force fresh fetch.",
                hours
            ),
            None => "Data fetched successfully from Ad Manager".to_string(),
        };

        Self {
            success: true,
            source: served.source,
            cached_hours_ago: served.cached_hours_ago.map(|hours| (hours * 100.0).round() / 100.0),
            network_code: served.snapshot.network_code,
            total_count: served.snapshot.total_count,
            fetched_at: served.snapshot.fetched_at,
            children: served.snapshot.records,
            message,
        }
    }
}

fn bad_request(body: serde_json::Value) -> Response {
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

/// `GET /fetch?network_code=<11 digits>[&refresh=true]`
pub async fn fetch_children(
    State(service): State<FetchState>,
    query: Result<Query<FetchQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(params) = match query {
        Ok(query) => query,
        Err(rejection) => {
            return Ok(bad_request(json!({
                "success": false,
                "error": rejection.body_text(),
                "usage": "/fetch?network_code=23033612553",
            })));
        }
    };

    let Some(raw_code) = params.code() else {
        return Ok(bad_request(json!({
            "success": false,
            "error": "Missing required parameter: network_code",
            "usage": "/fetch?network_code=23033612553",
        })));
    };

    let network_code = match raw_code.parse::<NetworkCode>() {
        Ok(code) => code,
        Err(err) => {
            return Ok(bad_request(json!({
                "success": false,
                "error": err.to_string(),
                "provided": raw_code,
            })));
        }
    };

    match service.serve(&network_code, params.force_refresh()).await {
        Ok(served) => {
            if served.source == Source::Fresh {
                tracing::info!(
                    "Successfully fetched {} publishers for network {}",
                    served.snapshot.total_count,
                    network_code
                );
            }
            Ok(Json(FetchResponse::from(served)).into_response())
        }
        Err(err) => {
            tracing::error!("Error fetching data for network {}: {}", network_code, err);
            Err(err)
        }
    }
}
