//! Playback Routes
//!
//! Issues time-boxed, entitlement-scoped read references. The permanent
//! object key never leaves the server.
//!
//! Endpoints:
//! - GET /api/v1/playback/:content_id - Grant a playback reference

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{Principal, Role};
use crate::catalog::CatalogError;
use crate::crypto::CipherMode;
use crate::error::{ErrorKind, StorageError};
use crate::routes::error_response;
use crate::state::AppState;

/// Grant returned to an entitled viewer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackGrant {
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub encrypted: bool,
    /// Base64 key material, present for encrypted content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Mode to decrypt under, present for encrypted content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher_mode: Option<CipherMode>,
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Not entitled to content {0}")]
    NotEntitled(String),

    #[error("Content not found: {0}")]
    ContentNotFound(String),

    #[error("Key material missing for encrypted content {0}")]
    MissingKey(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PlaybackError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotEntitled(_) => ErrorKind::Unauthorized,
            Self::ContentNotFound(_) => ErrorKind::InvalidArgument,
            Self::MissingKey(_) => ErrorKind::UndecryptableContent,
            Self::Catalog(e) => e.kind(),
            Self::Storage(_) => ErrorKind::StorageUnavailable,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotEntitled(_) => StatusCode::FORBIDDEN,
            Self::ContentNotFound(_) => StatusCode::NOT_FOUND,
            Self::MissingKey(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Catalog(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(StorageError::ObjectNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::ContentNotFound(_) => "CONTENT_NOT_FOUND",
            other => other.kind().code(),
        }
    }
}

impl IntoResponse for PlaybackError {
    fn into_response(self) -> axum::response::Response {
        error_response(self.status_code(), self.to_string(), self.code(), self.kind())
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/:content_id", get(grant))
}

/// GET /api/v1/playback/:content_id
async fn grant(
    State(state): State<AppState>,
    principal: Principal,
    Path(content_id): Path<String>,
) -> Result<Json<PlaybackGrant>, PlaybackError> {
    let catalog = state.catalog();

    if principal.role != Role::Admin && !catalog.is_entitled(&principal.id, &content_id).await? {
        tracing::warn!(
            principal_id = %principal.id,
            content_id = %content_id,
            "Playback denied"
        );
        return Err(PlaybackError::NotEntitled(content_id));
    }

    let record = catalog
        .content_record(&content_id)
        .await?
        .ok_or_else(|| PlaybackError::ContentNotFound(content_id.clone()))?;
    let reference = record
        .object_reference
        .clone()
        .ok_or_else(|| PlaybackError::ContentNotFound(content_id.clone()))?;

    let key = if record.encrypted {
        let material = record
            .key_material
            .as_ref()
            .ok_or_else(|| PlaybackError::MissingKey(content_id.clone()))?;
        Some(base64::engine::general_purpose::STANDARD.encode(material))
    } else {
        None
    };

    let ttl = Duration::from_secs(state.config().playback.url_ttl_secs);
    let url = state.object_store().presign_get(&reference, ttl).await?;

    tracing::info!(
        principal_id = %principal.id,
        content_id = %content_id,
        expires_at = %url.expires_at,
        "Playback reference granted"
    );

    Ok(Json(PlaybackGrant {
        url: url.url,
        expires_at: url.expires_at,
        encrypted: record.encrypted,
        key,
        cipher_mode: record.decrypt_mode(),
    }))
}
