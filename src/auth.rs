//! Caller identity
//!
//! Authentication happens upstream; the gateway forwards the verified
//! principal in `x-principal-id` and its role in `x-principal-role`.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use crate::error::ErrorKind;
use crate::routes::error_response;

pub const PRINCIPAL_ID_HEADER: &str = "x-principal-id";
pub const PRINCIPAL_ROLE_HEADER: &str = "x-principal-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Creator,
    Admin,
    Viewer,
}

impl Role {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "creator" => Some(Self::Creator),
            "admin" => Some(Self::Admin),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }

    /// Roles allowed to open upload sessions
    pub fn can_upload(self) -> bool {
        matches!(self, Self::Creator | Self::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AuthRejection> {
        let id = headers
            .get(PRINCIPAL_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(AuthRejection::MissingPrincipal)?;

        // Absent role means an ordinary viewer
        let role = match headers.get(PRINCIPAL_ROLE_HEADER) {
            None => Role::Viewer,
            Some(v) => v
                .to_str()
                .ok()
                .and_then(Role::parse)
                .ok_or(AuthRejection::UnknownRole)?,
        };

        Ok(Self {
            id: id.to_string(),
            role,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthRejection {
    #[error("Missing principal identity")]
    MissingPrincipal,

    #[error("Unknown principal role")]
    UnknownRole,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let kind = ErrorKind::Unauthorized;
        error_response(StatusCode::UNAUTHORIZED, self.to_string(), kind.code(), kind)
    }
}
