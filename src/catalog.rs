//! Content catalog
//!
//! Seam to the relational metadata store: which principal is entitled to
//! which content, and where each content id's committed object and key
//! material live.
//!
//! A content id belongs to the first principal that links an object to it.
//! Later links from anyone else are refused.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;

use crate::crypto::CipherMode;
use crate::error::ErrorKind;
use crate::storage::ObjectReference;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt key material for {0}")]
    CorruptKey(String),

    #[error("Content {content_id} belongs to another principal")]
    NotOwner { content_id: String },
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Database(_) => ErrorKind::Transient,
            Self::CorruptKey(_) => ErrorKind::UndecryptableContent,
            Self::NotOwner { .. } => ErrorKind::Unauthorized,
        }
    }
}

/// A content id's storage and encryption facts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRecord {
    pub content_id: String,
    /// Principal that linked the current object; `None` until first link
    pub owner_id: Option<String>,
    pub object_reference: Option<ObjectReference>,
    pub encrypted: bool,
    /// Mode the object was encrypted under; only meaningful when `encrypted`
    pub cipher_mode: Option<CipherMode>,
    /// Raw symmetric key; only present for encrypted content
    pub key_material: Option<Vec<u8>>,
}

impl ContentRecord {
    /// Mode to decrypt with. Encrypted content with no recorded mode predates
    /// legacy tracking and is AEAD.
    pub fn decrypt_mode(&self) -> Option<CipherMode> {
        self.encrypted
            .then(|| self.cipher_mode.unwrap_or(CipherMode::Aead))
    }
}

#[async_trait]
pub trait ContentCatalog: Send + Sync {
    async fn is_entitled(&self, principal_id: &str, content_id: &str) -> Result<bool, CatalogError>;

    async fn content_record(&self, content_id: &str) -> Result<Option<ContentRecord>, CatalogError>;

    /// Point a content id at a freshly committed object owned by `owner_id`.
    /// `cipher_mode` is `None` for clear content. Fails with `NotOwner` when
    /// another principal already owns the content id.
    async fn link_object(
        &self,
        content_id: &str,
        owner_id: &str,
        reference: &ObjectReference,
        cipher_mode: Option<CipherMode>,
    ) -> Result<(), CatalogError>;
}

// ============================================================================
// In-Memory Catalog
// ============================================================================

#[derive(Clone, Default)]
pub struct MemoryCatalog {
    inner: Arc<RwLock<MemoryCatalogInner>>,
}

#[derive(Default)]
struct MemoryCatalogInner {
    records: HashMap<String, ContentRecord>,
    entitlements: HashSet<(String, String)>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn grant(&self, principal_id: &str, content_id: &str) {
        let mut inner = self.inner.write().await;
        inner
            .entitlements
            .insert((principal_id.to_string(), content_id.to_string()));
    }

    pub async fn set_key(&self, content_id: &str, key: Vec<u8>) {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .entry(content_id.to_string())
            .or_insert_with(|| empty_record(content_id));
        record.key_material = Some(key);
        record.encrypted = true;
    }
}

fn empty_record(content_id: &str) -> ContentRecord {
    ContentRecord {
        content_id: content_id.to_string(),
        owner_id: None,
        object_reference: None,
        encrypted: false,
        cipher_mode: None,
        key_material: None,
    }
}

#[async_trait]
impl ContentCatalog for MemoryCatalog {
    async fn is_entitled(&self, principal_id: &str, content_id: &str) -> Result<bool, CatalogError> {
        let inner = self.inner.read().await;
        Ok(inner
            .entitlements
            .contains(&(principal_id.to_string(), content_id.to_string())))
    }

    async fn content_record(&self, content_id: &str) -> Result<Option<ContentRecord>, CatalogError> {
        Ok(self.inner.read().await.records.get(content_id).cloned())
    }

    async fn link_object(
        &self,
        content_id: &str,
        owner_id: &str,
        reference: &ObjectReference,
        cipher_mode: Option<CipherMode>,
    ) -> Result<(), CatalogError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .entry(content_id.to_string())
            .or_insert_with(|| empty_record(content_id));

        if record.owner_id.as_deref().is_some_and(|owner| owner != owner_id) {
            return Err(CatalogError::NotOwner {
                content_id: content_id.to_string(),
            });
        }

        record.owner_id = Some(owner_id.to_string());
        record.object_reference = Some(reference.clone());
        record.encrypted = cipher_mode.is_some();
        record.cipher_mode = cipher_mode;
        Ok(())
    }
}

// ============================================================================
// SQLite Catalog
// ============================================================================

/// Catalog backed by the `content` and `entitlements` tables
#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> CatalogError {
    CatalogError::Database(e.to_string())
}

#[async_trait]
impl ContentCatalog for SqliteCatalog {
    async fn is_entitled(&self, principal_id: &str, content_id: &str) -> Result<bool, CatalogError> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM entitlements WHERE principal_id = ? AND content_id = ?",
        )
        .bind(principal_id)
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(found.is_some())
    }

    async fn content_record(&self, content_id: &str) -> Result<Option<ContentRecord>, CatalogError> {
        let row = sqlx::query(
            "SELECT id, owner_id, object_key, encrypted, cipher_mode, key_material FROM content WHERE id = ?",
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let object_key: Option<String> = row.try_get("object_key").map_err(db_err)?;
        let encrypted: i64 = row.try_get("encrypted").map_err(db_err)?;
        let cipher_mode: Option<String> = row.try_get("cipher_mode").map_err(db_err)?;
        let key_material: Option<String> = row.try_get("key_material").map_err(db_err)?;

        let key_material = key_material
            .map(|k| {
                base64::engine::general_purpose::STANDARD
                    .decode(k)
                    .map_err(|_| CatalogError::CorruptKey(content_id.to_string()))
            })
            .transpose()?;

        Ok(Some(ContentRecord {
            content_id: row.try_get("id").map_err(db_err)?,
            owner_id: row.try_get("owner_id").map_err(db_err)?,
            object_reference: object_key.map(ObjectReference),
            encrypted: encrypted != 0,
            cipher_mode: cipher_mode.as_deref().and_then(CipherMode::parse),
            key_material,
        }))
    }

    async fn link_object(
        &self,
        content_id: &str,
        owner_id: &str,
        reference: &ObjectReference,
        cipher_mode: Option<CipherMode>,
    ) -> Result<(), CatalogError> {
        // Ownership check and update in one statement
        let result = sqlx::query(
            r#"
            INSERT INTO content (id, owner_id, object_key, encrypted, cipher_mode, updated_at)
            VALUES (?, ?, ?, ?, ?, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                object_key = excluded.object_key,
                encrypted = excluded.encrypted,
                cipher_mode = excluded.cipher_mode,
                updated_at = excluded.updated_at
            WHERE content.owner_id IS NULL OR content.owner_id = excluded.owner_id
            "#,
        )
        .bind(content_id)
        .bind(owner_id)
        .bind(reference.key())
        .bind(cipher_mode.is_some() as i64)
        .bind(cipher_mode.map(CipherMode::as_str))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::NotOwner {
                content_id: content_id.to_string(),
            });
        }

        Ok(())
    }
}
