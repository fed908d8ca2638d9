//! Shared harness for integration tests
//!
//! Wires a real `SessionTracker` to in-memory collaborators and exposes it to
//! the client through an in-process transport with fault-injection hooks.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use parking_lot::Mutex;
use tower::ServiceExt;

use reelsafe::auth::{PRINCIPAL_ID_HEADER, PRINCIPAL_ROLE_HEADER};
use reelsafe::catalog::MemoryCatalog;
use reelsafe::client::{ClientError, PlaybackSource, UploadTransport};
use reelsafe::config::Config;
use reelsafe::routes::api_router;
use reelsafe::routes::playback::PlaybackGrant;
use reelsafe::state::AppState;
use reelsafe::storage::MemoryObjectStore;
use reelsafe::upload::{
    parse_session_id, ChunkStore, ChunkUploadResponse, Committer, InitializeRequest,
    InitializeResponse, MemorySideCache, SessionStatusResponse, SessionTracker, TrackerSettings,
    UploadError,
};

pub const CREATOR: &str = "creator-1";

pub struct Harness {
    pub tracker: SessionTracker,
    pub store: Arc<MemoryObjectStore>,
    pub catalog: MemoryCatalog,
    pub side_cache: Arc<MemorySideCache>,
    pub config: Config,
}

impl Harness {
    pub fn new() -> Self {
        let config = Config::default();
        let store = Arc::new(MemoryObjectStore::new());
        let catalog = MemoryCatalog::new();
        let side_cache = Arc::new(MemorySideCache::new());

        let committer = Committer::new(store.clone()).with_catalog(Arc::new(catalog.clone()));
        let tracker = SessionTracker::new(
            ChunkStore::in_memory(),
            side_cache.clone(),
            committer,
            TrackerSettings::from(&config.upload),
        );

        Self {
            tracker,
            store,
            catalog,
            side_cache,
            config,
        }
    }

    pub fn state(&self) -> AppState {
        AppState::new(
            self.config.clone(),
            self.tracker.clone(),
            self.store.clone(),
            Arc::new(self.catalog.clone()),
        )
    }

    pub fn router(&self) -> axum::Router {
        api_router(self.state())
    }

    pub fn transport(&self) -> Arc<LocalTransport> {
        Arc::new(LocalTransport::new(self.tracker.clone(), CREATOR))
    }
}

pub fn server_error(error: &UploadError) -> ClientError {
    ClientError::Server {
        kind: error.kind(),
        status: error.status_code().as_u16(),
        message: error.to_string(),
    }
}

// ============================================================================
// In-Process Transport
// ============================================================================

#[derive(Default)]
struct Hooks {
    delays: HashMap<usize, Duration>,
    corrupt: HashMap<usize, usize>,
    transient: HashMap<usize, usize>,
}

/// Calls the tracker directly, as the HTTP handlers would
pub struct LocalTransport {
    tracker: SessionTracker,
    owner: String,
    hooks: Mutex<Hooks>,
    in_flight: AtomicUsize,
    starts: Mutex<Vec<(usize, usize)>>,
    arrivals: Mutex<Vec<usize>>,
    abandoned: Mutex<Vec<String>>,
}

impl LocalTransport {
    pub fn new(tracker: SessionTracker, owner: &str) -> Self {
        Self {
            tracker,
            owner: owner.to_string(),
            hooks: Mutex::new(Hooks::default()),
            in_flight: AtomicUsize::new(0),
            starts: Mutex::new(Vec::new()),
            arrivals: Mutex::new(Vec::new()),
            abandoned: Mutex::new(Vec::new()),
        }
    }

    /// Hold chunk `index` for `delay` before it reaches the tracker
    pub fn delay_chunk(&self, index: usize, delay: Duration) {
        self.hooks.lock().delays.insert(index, delay);
    }

    /// Flip a byte of chunk `index` on its next `times` sends
    pub fn corrupt_chunk(&self, index: usize, times: usize) {
        self.hooks.lock().corrupt.insert(index, times);
    }

    /// Fail chunk `index` with a transient error on its next `times` sends
    pub fn fail_chunk(&self, index: usize, times: usize) {
        self.hooks.lock().transient.insert(index, times);
    }

    /// `(chunk index, in-flight count)` at the start of every send
    pub fn starts(&self) -> Vec<(usize, usize)> {
        self.starts.lock().clone()
    }

    /// Chunk indices in the order the tracker accepted them
    pub fn arrivals(&self) -> Vec<usize> {
        self.arrivals.lock().clone()
    }

    pub fn abandoned(&self) -> Vec<String> {
        self.abandoned.lock().clone()
    }

    fn take(map: &mut HashMap<usize, usize>, index: usize) -> bool {
        match map.get_mut(&index) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    async fn send(
        &self,
        session_id: &str,
        index: usize,
        payload: Bytes,
        digest: &str,
    ) -> Result<ChunkUploadResponse, ClientError> {
        let (delay, corrupt, transient) = {
            let mut hooks = self.hooks.lock();
            let delay = hooks.delays.get(&index).copied();
            let corrupt = Self::take(&mut hooks.corrupt, index);
            let transient = Self::take(&mut hooks.transient, index);
            (delay, corrupt, transient)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if transient {
            return Err(ClientError::Transient("injected 503".to_string()));
        }

        let payload = if corrupt {
            let mut bytes = payload.to_vec();
            bytes[0] ^= 0xff;
            Bytes::from(bytes)
        } else {
            payload
        };

        let id = parse_session_id(session_id).map_err(|e| server_error(&e))?;
        let response = self
            .tracker
            .accept_chunk(&self.owner, id, index, payload, Some(digest))
            .await
            .map_err(|e| server_error(&e))?;

        self.arrivals.lock().push(index);
        Ok(response)
    }
}

#[async_trait]
impl UploadTransport for LocalTransport {
    async fn initialize(&self, request: &InitializeRequest) -> Result<InitializeResponse, ClientError> {
        let session = self
            .tracker
            .initialize(&self.owner, request)
            .await
            .map_err(|e| server_error(&e))?;

        Ok(InitializeResponse {
            session_id: session.id.to_string(),
            expires_at: session.expires_at,
        })
    }

    async fn upload_chunk(
        &self,
        session_id: &str,
        index: usize,
        payload: Bytes,
        digest: &str,
    ) -> Result<ChunkUploadResponse, ClientError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.starts.lock().push((index, now));

        let result = self.send(session_id, index, payload, digest).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn status(&self, session_id: &str) -> Result<SessionStatusResponse, ClientError> {
        let id = parse_session_id(session_id).map_err(|e| server_error(&e))?;
        self.tracker.status(id).await.map_err(|e| server_error(&e))
    }

    async fn abandon(&self, session_id: &str) -> Result<(), ClientError> {
        self.abandoned.lock().push(session_id.to_string());
        let id = parse_session_id(session_id).map_err(|e| server_error(&e))?;
        self.tracker
            .abandon(&self.owner, id)
            .await
            .map_err(|e| server_error(&e))
    }
}

// ============================================================================
// In-Process Playback Source
// ============================================================================

/// Fetches grants through the real router and bytes from the memory store
pub struct RouterPlaybackSource {
    pub router: axum::Router,
    pub store: Arc<MemoryObjectStore>,
    pub principal: String,
    pub role: String,
}

#[async_trait]
impl PlaybackSource for RouterPlaybackSource {
    async fn fetch_grant(&self, content_id: &str) -> Result<PlaybackGrant, ClientError> {
        let request = Request::builder()
            .uri(format!("/api/v1/playback/{}", content_id))
            .header(PRINCIPAL_ID_HEADER, &self.principal)
            .header(PRINCIPAL_ROLE_HEADER, &self.role)
            .body(Body::empty())
            .map_err(|e| ClientError::Transient(e.to_string()))?;

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| ClientError::Transient(e.to_string()))?;
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| ClientError::Transient(e.to_string()))?;

        if status != StatusCode::OK {
            return Err(ClientError::Server {
                kind: reelsafe::error::ErrorKind::Unauthorized,
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        serde_json::from_slice(&body).map_err(|e| ClientError::Transient(e.to_string()))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, ClientError> {
        self.store
            .resolve(url)
            .map_err(|e| ClientError::Transient(e.to_string()))
    }
}

/// Deterministic test payload
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
