//! Client transports
//!
//! [`UploadTransport`] and [`PlaybackSource`] are the seams between the
//! client logic and the wire. [`HttpTransport`] implements both over
//! `reqwest` against the ReelSafe HTTP API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::auth::{PRINCIPAL_ID_HEADER, PRINCIPAL_ROLE_HEADER};
use crate::error::ErrorKind;
use crate::routes::playback::PlaybackGrant;
use crate::upload::{
    ChunkUploadResponse, InitializeRequest, InitializeResponse, SessionStatusResponse,
    DIGEST_HEADER,
};

use super::ClientError;

#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn initialize(&self, request: &InitializeRequest) -> Result<InitializeResponse, ClientError>;

    /// Send one chunk with the hex digest of exactly these bytes
    async fn upload_chunk(
        &self,
        session_id: &str,
        index: usize,
        payload: Bytes,
        digest: &str,
    ) -> Result<ChunkUploadResponse, ClientError>;

    async fn status(&self, session_id: &str) -> Result<SessionStatusResponse, ClientError>;

    /// Best-effort release of a session the client is giving up on
    async fn abandon(&self, session_id: &str) -> Result<(), ClientError>;
}

#[async_trait]
pub trait PlaybackSource: Send + Sync {
    /// Ask for a time-boxed reference to `content_id`
    async fn fetch_grant(&self, content_id: &str) -> Result<PlaybackGrant, ClientError>;

    /// Download the bytes behind a time-boxed reference
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, ClientError>;
}

// ============================================================================
// HTTP Transport
// ============================================================================

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    principal_id: String,
    role: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, principal_id: &str, role: &str) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ClientError::Transient(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            principal_id: principal_id.to_string(),
            role: role.to_string(),
        })
    }

    /// Time a round trip to the health endpoint
    pub async fn probe_rtt(&self) -> Result<Duration, ClientError> {
        let start = Instant::now();
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response).await?;
        Ok(start.elapsed())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header(PRINCIPAL_ID_HEADER, &self.principal_id)
            .header(PRINCIPAL_ROLE_HEADER, &self.role)
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn initialize(&self, request: &InitializeRequest) -> Result<InitializeResponse, ClientError> {
        let response = self
            .authed(self.client.post(self.url("/upload/init")))
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        parse_json(response).await
    }

    async fn upload_chunk(
        &self,
        session_id: &str,
        index: usize,
        payload: Bytes,
        digest: &str,
    ) -> Result<ChunkUploadResponse, ClientError> {
        let response = self
            .authed(
                self.client
                    .post(self.url(&format!("/upload/{}/chunks/{}", session_id, index))),
            )
            .header(DIGEST_HEADER, digest)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        parse_json(response).await
    }

    async fn status(&self, session_id: &str) -> Result<SessionStatusResponse, ClientError> {
        let response = self
            .authed(self.client.get(self.url(&format!("/upload/{}", session_id))))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        parse_json(response).await
    }

    async fn abandon(&self, session_id: &str) -> Result<(), ClientError> {
        let response = self
            .authed(self.client.delete(self.url(&format!("/upload/{}", session_id))))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        check_status(response).await.map(|_| ())
    }
}

#[async_trait]
impl PlaybackSource for HttpTransport {
    async fn fetch_grant(&self, content_id: &str) -> Result<PlaybackGrant, ClientError> {
        let response = self
            .authed(self.client.get(self.url(&format!("/playback/{}", content_id))))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        parse_json(response).await
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, ClientError> {
        // Presigned URL carries its own authorization
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        check_status(response)
            .await?
            .bytes()
            .await
            .map_err(map_reqwest_error)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn map_reqwest_error(e: reqwest::Error) -> ClientError {
    if e.is_connect() || e.is_timeout() {
        ClientError::NetworkUnavailable(e.to_string())
    } else {
        ClientError::Transient(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    Err(error_from_body(status, &text))
}

async fn parse_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    check_status(response)
        .await?
        .json::<T>()
        .await
        .map_err(|e| ClientError::Transient(format!("malformed response: {}", e)))
}

fn error_from_body(status: StatusCode, text: &str) -> ClientError {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => ClientError::Server {
            kind: body
                .code
                .as_deref()
                .map(ErrorKind::from_code)
                .unwrap_or_else(|| kind_for_status(status)),
            status: status.as_u16(),
            message: body.error,
        },
        Err(_) => ClientError::Server {
            kind: kind_for_status(status),
            status: status.as_u16(),
            message: if text.is_empty() {
                status.to_string()
            } else {
                text.to_string()
            },
        },
    }
}

/// Fallback when a response carries no machine-readable error body
fn kind_for_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::BAD_REQUEST => ErrorKind::InvalidArgument,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::Unauthorized,
        StatusCode::NOT_FOUND => ErrorKind::SessionNotFound,
        StatusCode::UNPROCESSABLE_ENTITY => ErrorKind::CorruptedChunk,
        StatusCode::PAYLOAD_TOO_LARGE => ErrorKind::InvalidArgument,
        StatusCode::BAD_GATEWAY => ErrorKind::StorageUnavailable,
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => ErrorKind::Transient,
        _ => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_uses_server_code() {
        let body = r#"{"error":"digest mismatch","code":"CORRUPTED_CHUNK","kind":"corruptedChunk","retryable":true}"#;
        match error_from_body(StatusCode::UNPROCESSABLE_ENTITY, body) {
            ClientError::Server { kind, status, message } => {
                assert_eq!(kind, ErrorKind::CorruptedChunk);
                assert_eq!(status, 422);
                assert_eq!(message, "digest mismatch");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_error_without_body_falls_back_to_status() {
        let err = error_from_body(StatusCode::SERVICE_UNAVAILABLE, "");
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.is_retryable());

        let err = error_from_body(StatusCode::FORBIDDEN, "<html>");
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(!err.is_retryable());
    }
}
