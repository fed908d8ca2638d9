//! Route modules for the ReelSafe server

pub mod health;
pub mod playback;
pub mod upload;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::error::ErrorKind;
use crate::state::AppState;

/// JSON body shared by every error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub kind: ErrorKind,
    pub retryable: bool,
}

pub(crate) fn error_response(status: StatusCode, message: String, code: &str, kind: ErrorKind) -> Response {
    let body = Json(ErrorResponse {
        error: message,
        code: code.to_string(),
        kind,
        retryable: kind.is_retryable(),
    });

    (status, body).into_response()
}

/// All HTTP routes with state applied; middleware layers are added by the binary
pub fn api_router(state: AppState) -> Router {
    let max_chunk_bytes = state.config().upload.max_chunk_bytes;

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .nest("/api/v1/upload", upload::router(max_chunk_bytes))
        .nest("/api/v1/playback", playback::router())
        .with_state(state)
}
