//! Upload Routes
//!
//! HTTP endpoints for the resumable chunked upload protocol.
//!
//! Endpoints:
//! - POST /api/v1/upload/init - Open a session
//! - POST /api/v1/upload/:session_id/chunks/:index - Upload a chunk
//! - GET /api/v1/upload/:session_id - Get session status
//! - DELETE /api/v1/upload/:session_id - Abandon upload

use axum::body::Bytes;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::auth::Principal;
use crate::routes::error_response;
use crate::state::AppState;
use crate::upload::{
    parse_session_id, ChunkUploadResponse, InitializeRequest, InitializeResponse,
    SessionStatusResponse, UploadError, DIGEST_HEADER,
};

// ============================================================================
// Error Response
// ============================================================================

impl IntoResponse for UploadError {
    fn into_response(self) -> axum::response::Response {
        let kind = self.kind();
        error_response(self.status_code(), self.to_string(), kind.code(), kind)
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router(max_chunk_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/init", post(initialize))
        .route(
            "/:session_id/chunks/:index",
            post(upload_chunk).layer(DefaultBodyLimit::max(max_chunk_bytes)),
        )
        .route("/:session_id", get(get_status).delete(abandon))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/upload/init
async fn initialize(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<InitializeRequest>,
) -> Result<(StatusCode, Json<InitializeResponse>), UploadError> {
    if !principal.role.can_upload() {
        return Err(UploadError::Unauthorized(format!(
            "principal {} may not upload",
            principal.id
        )));
    }

    let session = state.tracker().initialize(&principal.id, &request).await?;

    Ok((
        StatusCode::CREATED,
        Json(InitializeResponse {
            session_id: session.id.to_string(),
            expires_at: session.expires_at,
        }),
    ))
}

/// POST /api/v1/upload/:session_id/chunks/:index
///
/// The chunk data is the raw request body.
async fn upload_chunk(
    State(state): State<AppState>,
    principal: Principal,
    Path((session_id, index)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ChunkUploadResponse>, UploadError> {
    let session_id = parse_session_id(&session_id)?;
    let index: usize = index
        .parse()
        .map_err(|_| UploadError::InvalidArgument(format!("invalid chunk index {:?}", index)))?;

    let digest = headers
        .get(DIGEST_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());

    let response = state
        .tracker()
        .accept_chunk(&principal.id, session_id, index, body, digest)
        .await?;

    Ok(Json(response))
}

/// GET /api/v1/upload/:session_id
async fn get_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, UploadError> {
    let session_id = parse_session_id(&session_id)?;
    Ok(Json(state.tracker().status(session_id).await?))
}

/// DELETE /api/v1/upload/:session_id
async fn abandon(
    State(state): State<AppState>,
    principal: Principal,
    Path(session_id): Path<String>,
) -> Result<StatusCode, UploadError> {
    let session_id = parse_session_id(&session_id)?;
    state.tracker().abandon(&principal.id, session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
