//! Upload Session Tracker
//!
//! Owns every session this process created:
//! - Per-session `Mutex` serializes bitmap mutation, reassembly and commit
//! - Sessions proceed concurrently; the map lock is held only for lookups
//! - Bitmap state is mirrored to a durable side-cache on every change
//! - A background sweep expires abandoned sessions, gated on state

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::error::ErrorKind;

use super::chunk_store::{compute_hash, verify_hash, ChunkStore};
use super::committer::Committer;
use super::side_cache::SideCache;
use super::types::{
    ChunkUploadResponse, FailureReason, InitializeRequest, SessionState, SessionStatusResponse,
    UploadError, UploadSession,
};

type SessionEntry = Arc<Mutex<UploadSession>>;

/// Tracker timing knobs
#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    pub session_ttl: chrono::Duration,
    pub terminal_retention: chrono::Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl From<&UploadConfig> for TrackerSettings {
    fn from(config: &UploadConfig) -> Self {
        Self {
            session_ttl: chrono::Duration::seconds(config.session_ttl_secs),
            terminal_retention: chrono::Duration::seconds(config.terminal_retention_secs),
        }
    }
}

// ============================================================================
// Session Tracker
// ============================================================================

#[derive(Clone)]
pub struct SessionTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    chunk_store: ChunkStore,
    side_cache: Arc<dyn SideCache>,
    committer: Committer,
    settings: TrackerSettings,
}

impl SessionTracker {
    pub fn new(
        chunk_store: ChunkStore,
        side_cache: Arc<dyn SideCache>,
        committer: Committer,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                sessions: RwLock::new(HashMap::new()),
                chunk_store,
                side_cache,
                committer,
                settings,
            }),
        }
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Open a new session owned by `owner_id`
    pub async fn initialize(
        &self,
        owner_id: &str,
        request: &InitializeRequest,
    ) -> Result<UploadSession, UploadError> {
        if request.total_chunks <= 0 {
            return Err(UploadError::InvalidArgument(format!(
                "totalChunks must be positive, got {}",
                request.total_chunks
            )));
        }
        if request.content_type.trim().is_empty() {
            return Err(UploadError::InvalidArgument("contentType is required".to_string()));
        }
        if let Some(bytes) = request.total_bytes {
            if bytes < request.total_chunks as u64 {
                return Err(UploadError::InvalidArgument(format!(
                    "totalBytes {} cannot fill {} chunks",
                    bytes, request.total_chunks
                )));
            }
        }

        let mut session = UploadSession::new(
            owner_id,
            request.total_chunks as usize,
            request.total_bytes,
            String::new(),
            &request.content_type,
            request.metadata.clone(),
            self.inner.settings.session_ttl,
        );
        session.destination_key = destination_key(owner_id, session.id, &request.destination_key_hint);

        self.inner.side_cache.save(&session).await?;
        {
            let mut sessions = self.inner.sessions.write().await;
            sessions.insert(session.id, Arc::new(Mutex::new(session.clone())));
        }

        tracing::info!(
            session_id = %session.id,
            owner_id = %owner_id,
            total_chunks = session.total_chunks,
            destination_key = %session.destination_key,
            "Created upload session"
        );

        Ok(session)
    }

    /// Accept one chunk payload.
    ///
    /// The chunk that fills the bitmap reassembles and commits the payload
    /// before this call returns; later duplicates get the committed result.
    pub async fn accept_chunk(
        &self,
        owner_id: &str,
        session_id: Uuid,
        index: usize,
        payload: Bytes,
        digest: Option<&str>,
    ) -> Result<ChunkUploadResponse, UploadError> {
        let entry = self.lookup(session_id).await?;
        let mut session = entry.lock().await;

        if session.owner_id != owner_id {
            tracing::warn!(session_id = %session_id, "Chunk from non-owner rejected");
            return Err(UploadError::Unauthorized(format!(
                "session {} belongs to another principal",
                session_id
            )));
        }

        match session.state {
            SessionState::Initialized | SessionState::Accumulating => {
                if session.is_expired_at(Utc::now()) {
                    self.expire(&mut session).await;
                    return Err(UploadError::SessionNotFound(session_id.to_string()));
                }
            }
            SessionState::Complete | SessionState::Committed => {
                if index >= session.total_chunks {
                    return Err(UploadError::IndexOutOfRange {
                        index,
                        total: session.total_chunks,
                    });
                }
                tracing::debug!(
                    session_id = %session_id,
                    chunk_index = index,
                    "Duplicate chunk for completed session"
                );
                return Ok(session.chunk_response());
            }
            SessionState::Failed => return Err(failed_error(&session)),
            SessionState::Expired => {
                return Err(UploadError::SessionNotFound(session_id.to_string()));
            }
        }

        if index >= session.total_chunks {
            return Err(UploadError::IndexOutOfRange {
                index,
                total: session.total_chunks,
            });
        }

        if let Some(expected) = digest {
            if !verify_hash(&payload, expected) {
                let actual = compute_hash(&payload);
                tracing::warn!(
                    session_id = %session_id,
                    chunk_index = index,
                    expected = %expected,
                    actual = %actual,
                    "Chunk digest mismatch"
                );
                return Err(UploadError::CorruptedChunk {
                    index,
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let size = payload.len();
        self.inner
            .chunk_store
            .store_chunk(session_id, index, payload)
            .await?;
        let newly_received = session.mark_received(index);

        tracing::debug!(
            session_id = %session_id,
            chunk_index = index,
            size = size,
            received = session.received.len(),
            total = session.total_chunks,
            new = newly_received,
            "Chunk accepted"
        );

        if !session.is_complete() {
            if session.state == SessionState::Initialized {
                session.transition(SessionState::Accumulating);
            }
            // Bytes and bitmap already hold the chunk; the next save catches up
            self.persist(&session).await;
            return Ok(session.chunk_response());
        }

        session.transition(SessionState::Complete);
        self.persist(&session).await;

        self.reassemble_and_commit(&mut session).await?;
        Ok(session.chunk_response())
    }

    /// Snapshot of a session's progress
    pub async fn status(&self, session_id: Uuid) -> Result<SessionStatusResponse, UploadError> {
        let entry = self.lookup(session_id).await?;
        let session = entry.lock().await;

        if session.state.is_open() && session.is_expired_at(Utc::now()) {
            return Err(UploadError::SessionNotFound(session_id.to_string()));
        }
        if session.state == SessionState::Expired {
            return Err(UploadError::SessionNotFound(session_id.to_string()));
        }

        Ok(session.status_response())
    }

    /// Full session record, mainly for diagnostics
    pub async fn get_session(&self, session_id: Uuid) -> Result<UploadSession, UploadError> {
        let entry = self.lookup(session_id).await?;
        let session = entry.lock().await;
        Ok(session.clone())
    }

    /// Owner gives up on a session; releases chunk bytes ahead of expiry
    pub async fn abandon(&self, owner_id: &str, session_id: Uuid) -> Result<(), UploadError> {
        let entry = self.lookup(session_id).await?;
        let mut session = entry.lock().await;

        if session.owner_id != owner_id {
            return Err(UploadError::Unauthorized(format!(
                "session {} belongs to another principal",
                session_id
            )));
        }

        if !session.state.is_open() {
            return Ok(());
        }

        session.fail(FailureReason::new(ErrorKind::Canceled, "abandoned by owner"));
        self.release_chunks(session_id).await;
        self.persist(&session).await;

        tracing::info!(session_id = %session_id, "Upload session abandoned");

        Ok(())
    }

    // ========================================================================
    // Reassembly & Commit
    // ========================================================================

    /// Runs with the session lock held, so at most once per session
    async fn reassemble_and_commit(&self, session: &mut UploadSession) -> Result<(), UploadError> {
        let session_id = session.id;

        tracing::info!(
            session_id = %session_id,
            chunks = session.total_chunks,
            "Reassembling upload"
        );

        let payload = match self
            .inner
            .chunk_store
            .assemble_chunks(session_id, session.total_chunks)
            .await
        {
            Ok(payload) => payload,
            Err(e) => {
                self.fail(session, ErrorKind::IncompleteUpload, e.to_string()).await;
                return Err(e);
            }
        };

        if let Some(expected) = session.total_bytes {
            if payload.len() as u64 != expected {
                let message = format!(
                    "reassembled {} bytes, expected {}",
                    payload.len(),
                    expected
                );
                self.fail(session, ErrorKind::IncompleteUpload, message.clone()).await;
                return Err(UploadError::IncompleteUpload(message));
            }
        }

        // Reassembled bytes are not retained past this point
        self.release_chunks(session_id).await;

        match self.inner.committer.commit(session, payload).await {
            Ok(reference) => {
                session.final_reference = Some(reference);
                session.transition(SessionState::Committed);
                self.persist(session).await;
                Ok(())
            }
            Err(e) => {
                self.fail(session, ErrorKind::StorageUnavailable, e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn fail(&self, session: &mut UploadSession, kind: ErrorKind, message: String) {
        tracing::warn!(
            session_id = %session.id,
            kind = ?kind,
            reason = %message,
            "Upload session failed"
        );
        session.fail(FailureReason::new(kind, message));
        self.release_chunks(session.id).await;
        self.persist(session).await;
    }

    async fn expire(&self, session: &mut UploadSession) {
        session.transition(SessionState::Expired);
        self.release_chunks(session.id).await;
        self.persist(session).await;
        tracing::debug!(
            session_id = %session.id,
            missing = session.missing_chunks().len(),
            "Upload session expired"
        );
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Expire overdue open sessions and drop terminal ones past retention.
    ///
    /// Sessions whose lock is held are in use and skipped; a session that
    /// became complete is never removed on time alone.
    ///
    /// Returns the number of sessions removed
    pub async fn sweep_expired(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let candidates: Vec<(Uuid, SessionEntry)> = {
            let sessions = self.inner.sessions.read().await;
            sessions.iter().map(|(id, e)| (*id, e.clone())).collect()
        };

        let mut removed = 0;
        for (id, entry) in candidates {
            let Ok(mut session) = entry.try_lock() else {
                continue;
            };

            let remove = match session.state {
                SessionState::Initialized | SessionState::Accumulating => {
                    if session.is_expired_at(now) {
                        session.transition(SessionState::Expired);
                        true
                    } else {
                        false
                    }
                }
                SessionState::Complete => false,
                SessionState::Committed | SessionState::Failed | SessionState::Expired => {
                    now - session.updated_at > self.inner.settings.terminal_retention
                }
            };

            if !remove {
                continue;
            }

            drop(session);
            self.inner.sessions.write().await.remove(&id);
            self.release_chunks(id).await;
            if let Err(e) = self.inner.side_cache.remove(id).await {
                tracing::warn!(session_id = %id, error = %e, "Failed to drop side-cache record");
            }
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(count = removed, "Swept upload sessions");
        }

        removed
    }

    /// Start background sweep task
    pub fn start_sweep_task(self, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                self.sweep_expired().await;
            }
        })
    }

    /// Reload sessions from the side-cache after a restart.
    ///
    /// Chunk bytes do not survive a restart, so any session that had received
    /// chunks is failed and must be re-uploaded from scratch.
    pub async fn recover(&self) -> Result<usize, UploadError> {
        let records = self.inner.side_cache.load_all().await?;
        let mut recovered = 0;
        let mut sessions = self.inner.sessions.write().await;

        for mut session in records {
            if sessions.contains_key(&session.id) {
                continue;
            }

            let lost_bytes = match session.state {
                SessionState::Initialized => !session.received.is_empty(),
                SessionState::Accumulating | SessionState::Complete => true,
                _ => false,
            };

            if lost_bytes {
                session.fail(FailureReason::new(
                    ErrorKind::IncompleteUpload,
                    "chunk bytes lost in restart; re-upload required",
                ));
                self.inner.side_cache.save(&session).await?;
            }

            tracing::debug!(
                session_id = %session.id,
                state = session.state.as_str(),
                "Recovered upload session"
            );

            sessions.insert(session.id, Arc::new(Mutex::new(session)));
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!(count = recovered, "Recovered upload sessions from side-cache");
        }

        Ok(recovered)
    }

    // ========================================================================
    // Query Methods
    // ========================================================================

    /// Get session count
    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn lookup(&self, session_id: Uuid) -> Result<SessionEntry, UploadError> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))
    }

    async fn persist(&self, session: &UploadSession) {
        if let Err(e) = self.inner.side_cache.save(session).await {
            tracing::warn!(session_id = %session.id, error = %e, "Failed to persist session");
        }
    }

    async fn release_chunks(&self, session_id: Uuid) {
        if let Err(e) = self.inner.chunk_store.delete_session_chunks(session_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to release chunks");
        }
    }
}

/// Parse a session id from a path segment
pub fn parse_session_id(id: &str) -> Result<Uuid, UploadError> {
    Uuid::parse_str(id).map_err(|_| UploadError::SessionNotFound(id.to_string()))
}

fn failed_error(session: &UploadSession) -> UploadError {
    let message = session
        .failure
        .as_ref()
        .map(|f| f.message.clone())
        .unwrap_or_else(|| "session failed".to_string());

    match session.failure.as_ref().map(|f| f.kind) {
        Some(ErrorKind::StorageUnavailable) => UploadError::StorageUnavailable(message),
        Some(ErrorKind::IncompleteUpload) => UploadError::IncompleteUpload(message),
        _ => UploadError::SessionNotFound(session.id.to_string()),
    }
}

/// Build `videos/<owner>/<session>/<name>` from a client-supplied hint
fn destination_key(owner_id: &str, session_id: Uuid, hint: &str) -> String {
    let name = hint.rsplit(['/', '\\']).next().unwrap_or_default();
    let name = sanitize_segment(name);
    let name = if name.is_empty() { "upload.bin".to_string() } else { name };

    format!("videos/{}/{}/{}", sanitize_segment(owner_id), session_id, name)
}

fn sanitize_segment(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == '-')
        .to_string()
}

// ============================================================================
// Tests
// ============================================================================
