//! The hearth server: a unified websocket voice-session endpoint plus
//! the HTTP settings/record surface around it.

pub mod http;
pub mod registry;
pub mod state;
pub mod ws;

pub use http::create_router;
pub use registry::ConnectionRegistry;
pub use state::AppState;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// API-surface errors.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Engines not ready")]
    NotReady,

    #[error("Storage error: {0}")]
    Storage(#[from] hearth_storage::StorageError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if matches!(self, ApiError::Storage(_)) {
            tracing::error!("Storage error on API surface: {self}");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
