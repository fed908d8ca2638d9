//! Durable Side-Cache
//!
//! Persists session bitmaps and lifecycle state so another process instance
//! can resume tracking after a restart. Chunk bytes are NOT persisted here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::storage::ObjectReference;

use super::types::{FailureReason, SessionState, UploadError, UploadSession};

/// Persistence for session metadata
#[async_trait]
pub trait SideCache: Send + Sync {
    /// Insert or replace the record for `session`
    async fn save(&self, session: &UploadSession) -> Result<(), UploadError>;

    /// Drop the record for a session
    async fn remove(&self, session_id: Uuid) -> Result<(), UploadError>;

    /// Load every persisted session
    async fn load_all(&self) -> Result<Vec<UploadSession>, UploadError>;
}

// ============================================================================
// In-Memory Side-Cache
// ============================================================================

/// Side-cache for single-instance deployments and tests
#[derive(Clone, Default)]
pub struct MemorySideCache {
    records: Arc<RwLock<HashMap<Uuid, UploadSession>>>,
}

impl MemorySideCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, session_id: Uuid) -> Option<UploadSession> {
        self.records.read().await.get(&session_id).cloned()
    }
}

#[async_trait]
impl SideCache for MemorySideCache {
    async fn save(&self, session: &UploadSession) -> Result<(), UploadError> {
        self.records.write().await.insert(session.id, session.clone());
        Ok(())
    }

    async fn remove(&self, session_id: Uuid) -> Result<(), UploadError> {
        self.records.write().await.remove(&session_id);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<UploadSession>, UploadError> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

// ============================================================================
// SQLite Side-Cache
// ============================================================================

/// Side-cache backed by the `upload_sessions` table
#[derive(Clone)]
pub struct SqliteSideCache {
    pool: SqlitePool,
}

impl SqliteSideCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn db_err(e: impl std::fmt::Display) -> UploadError {
    UploadError::SideCache(e.to_string())
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, UploadError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(db_err)
}

#[async_trait]
impl SideCache for SqliteSideCache {
    async fn save(&self, session: &UploadSession) -> Result<(), UploadError> {
        let received = serde_json::to_string(&session.received).map_err(db_err)?;
        let metadata = serde_json::to_string(&session.metadata).map_err(db_err)?;
        let failure = session
            .failure
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO upload_sessions (
                id, owner_id, total_chunks, total_bytes, received_chunks, destination_key,
                content_type, metadata, state, final_reference, failure,
                created_at, expires_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                received_chunks = excluded.received_chunks,
                state = excluded.state,
                final_reference = excluded.final_reference,
                failure = excluded.failure,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(session.id.to_string())
        .bind(&session.owner_id)
        .bind(session.total_chunks as i64)
        .bind(session.total_bytes.map(|b| b as i64))
        .bind(received)
        .bind(&session.destination_key)
        .bind(&session.content_type)
        .bind(metadata)
        .bind(session.state.as_str())
        .bind(session.final_reference.as_ref().map(|r| r.to_string()))
        .bind(failure)
        .bind(session.created_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn remove(&self, session_id: Uuid) -> Result<(), UploadError> {
        sqlx::query("DELETE FROM upload_sessions WHERE id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<UploadSession>, UploadError> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, total_chunks, total_bytes, received_chunks, destination_key,
                   content_type, metadata, state, final_reference, failure,
                   created_at, expires_at, updated_at
            FROM upload_sessions
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(db_err)?;
            let state: String = row.try_get("state").map_err(db_err)?;
            let received: String = row.try_get("received_chunks").map_err(db_err)?;
            let metadata: String = row.try_get("metadata").map_err(db_err)?;
            let failure: Option<String> = row.try_get("failure").map_err(db_err)?;
            let final_reference: Option<String> = row.try_get("final_reference").map_err(db_err)?;
            let total_chunks: i64 = row.try_get("total_chunks").map_err(db_err)?;
            let total_bytes: Option<i64> = row.try_get("total_bytes").map_err(db_err)?;
            let created_at: String = row.try_get("created_at").map_err(db_err)?;
            let expires_at: String = row.try_get("expires_at").map_err(db_err)?;
            let updated_at: String = row.try_get("updated_at").map_err(db_err)?;

            sessions.push(UploadSession {
                id: Uuid::parse_str(&id).map_err(db_err)?,
                owner_id: row.try_get("owner_id").map_err(db_err)?,
                total_chunks: total_chunks as usize,
                total_bytes: total_bytes.map(|b| b as u64),
                received: serde_json::from_str(&received).map_err(db_err)?,
                destination_key: row.try_get("destination_key").map_err(db_err)?,
                content_type: row.try_get("content_type").map_err(db_err)?,
                metadata: serde_json::from_str(&metadata).map_err(db_err)?,
                state: SessionState::parse(&state)
                    .ok_or_else(|| db_err(format!("unknown session state {}", state)))?,
                final_reference: final_reference.map(ObjectReference),
                failure: failure
                    .map(|f| serde_json::from_str::<FailureReason>(&f))
                    .transpose()
                    .map_err(db_err)?,
                created_at: parse_time(&created_at)?,
                expires_at: parse_time(&expires_at)?,
                updated_at: parse_time(&updated_at)?,
            });
        }

        Ok(sessions)
    }
}
