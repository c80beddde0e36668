use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors raised while fetching account records from Ad Manager.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Missing network code or credential reference. Not retried; the
    /// caller has to supply configuration.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A page response without column metadata, or with rows that do not
    /// line up with the captured columns.
    #[error("Invalid response from server: {message}")]
    InvalidResponse { message: String },

    /// Transport failure or SOAP fault reported by the query service.
    #[error("Remote query failed: {message}")]
    RemoteQuery { message: String },
}

impl FetchError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse { message: message.into() }
    }

    pub fn remote_query(message: impl Into<String>) -> Self {
        Self::RemoteQuery { message: message.into() }
    }
}

/// Unified application error.
///
/// Every layer (config, fetch, snapshot storage, mail, remote config)
/// funnels into this type so handlers and the CLI report failures the same
/// way.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Snapshot store error: {0}")]
    Storage(String),

    #[error("Email delivery failed: {0}")]
    Delivery(String),

    #[error("Remote config error: {0}")]
    RemoteConfig(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Server error: {0}")]
    Server(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "success": false,
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
