//! Chunk Store
//!
//! Ephemeral storage for uploaded chunks before reassembly. Bytes held here
//! are not expected to survive a process restart.
//! Supports in-memory and local filesystem backends.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::UploadError;

// ============================================================================
// Chunk Store Trait
// ============================================================================

/// Trait for chunk storage backends
#[async_trait::async_trait]
pub trait ChunkStorage: Send + Sync {
    /// Store a chunk, replacing any earlier payload for the same index
    async fn store_chunk(
        &self,
        session_id: Uuid,
        chunk_index: usize,
        data: Bytes,
    ) -> Result<(), UploadError>;

    /// Get a chunk by session and index
    async fn get_chunk(
        &self,
        session_id: Uuid,
        chunk_index: usize,
    ) -> Result<Option<Bytes>, UploadError>;

    /// Delete all chunks for a session
    async fn delete_session_chunks(&self, session_id: Uuid) -> Result<usize, UploadError>;
}

// ============================================================================
// Chunk Store (Main Implementation)
// ============================================================================

/// Main chunk store with pluggable backends
#[derive(Clone)]
pub struct ChunkStore {
    backend: Arc<dyn ChunkStorage>,
}

impl ChunkStore {
    /// Create with in-memory storage
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryChunkStorage::default()),
        }
    }

    /// Create with local filesystem storage
    pub fn with_local_storage(base_path: PathBuf) -> Self {
        Self {
            backend: Arc::new(LocalChunkStorage::new(base_path)),
        }
    }

    pub async fn store_chunk(
        &self,
        session_id: Uuid,
        chunk_index: usize,
        data: Bytes,
    ) -> Result<(), UploadError> {
        self.backend.store_chunk(session_id, chunk_index, data).await
    }

    pub async fn get_chunk(
        &self,
        session_id: Uuid,
        chunk_index: usize,
    ) -> Result<Option<Bytes>, UploadError> {
        self.backend.get_chunk(session_id, chunk_index).await
    }

    pub async fn delete_session_chunks(&self, session_id: Uuid) -> Result<usize, UploadError> {
        self.backend.delete_session_chunks(session_id).await
    }

    /// Concatenate chunks `0..chunk_count` in index order.
    ///
    /// Arrival order is irrelevant; a missing index fails with `IncompleteUpload`.
    pub async fn assemble_chunks(
        &self,
        session_id: Uuid,
        chunk_count: usize,
    ) -> Result<Bytes, UploadError> {
        let mut parts = Vec::with_capacity(chunk_count);
        let mut total = 0usize;

        for i in 0..chunk_count {
            let chunk = self.get_chunk(session_id, i).await?.ok_or_else(|| {
                UploadError::IncompleteUpload(format!("chunk {} missing from chunk store", i))
            })?;
            total += chunk.len();
            parts.push(chunk);
        }

        let mut result = BytesMut::with_capacity(total);
        for part in parts {
            result.extend_from_slice(&part);
        }

        Ok(result.freeze())
    }
}

// ============================================================================
// In-Memory Storage
// ============================================================================

#[derive(Default)]
struct MemoryChunkStorage {
    chunks: RwLock<HashMap<Uuid, BTreeMap<usize, Bytes>>>,
}

#[async_trait::async_trait]
impl ChunkStorage for MemoryChunkStorage {
    async fn store_chunk(
        &self,
        session_id: Uuid,
        chunk_index: usize,
        data: Bytes,
    ) -> Result<(), UploadError> {
        let mut chunks = self.chunks.write().await;
        chunks.entry(session_id).or_default().insert(chunk_index, data);
        Ok(())
    }

    async fn get_chunk(
        &self,
        session_id: Uuid,
        chunk_index: usize,
    ) -> Result<Option<Bytes>, UploadError> {
        let chunks = self.chunks.read().await;
        Ok(chunks
            .get(&session_id)
            .and_then(|c| c.get(&chunk_index))
            .cloned())
    }

    async fn delete_session_chunks(&self, session_id: Uuid) -> Result<usize, UploadError> {
        let mut chunks = self.chunks.write().await;
        Ok(chunks.remove(&session_id).map(|c| c.len()).unwrap_or(0))
    }
}

// ============================================================================
// Local Filesystem Storage
// ============================================================================

/// Local filesystem chunk storage
struct LocalChunkStorage {
    base_path: PathBuf,
}

impl LocalChunkStorage {
    fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.base_path.join("chunks").join(session_id.to_string())
    }

    fn chunk_path(&self, session_id: Uuid, chunk_index: usize) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("{:08}.chunk", chunk_index))
    }
}

fn io_err(e: std::io::Error) -> UploadError {
    UploadError::InternalError(format!("chunk store: {}", e))
}

#[async_trait::async_trait]
impl ChunkStorage for LocalChunkStorage {
    async fn store_chunk(
        &self,
        session_id: Uuid,
        chunk_index: usize,
        data: Bytes,
    ) -> Result<(), UploadError> {
        let path = self.chunk_path(session_id, chunk_index);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        // Write then rename so a resubmission never leaves a torn chunk behind
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, &data).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;

        Ok(())
    }

    async fn get_chunk(
        &self,
        session_id: Uuid,
        chunk_index: usize,
    ) -> Result<Option<Bytes>, UploadError> {
        let path = self.chunk_path(session_id, chunk_index);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn delete_session_chunks(&self, session_id: Uuid) -> Result<usize, UploadError> {
        let session_dir = self.session_dir(session_id);

        if !session_dir.exists() {
            return Ok(0);
        }

        let mut count = 0;
        let mut entries = tokio::fs::read_dir(&session_dir).await.map_err(io_err)?;

        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            tokio::fs::remove_file(entry.path()).await.map_err(io_err)?;
            count += 1;
        }

        // Remove empty directory
        let _ = tokio::fs::remove_dir(&session_dir).await;

        Ok(count)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Compute SHA-256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify hash matches data
pub fn verify_hash(data: &[u8], expected_hash: &str) -> bool {
    compute_hash(data).eq_ignore_ascii_case(expected_hash)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_compute_hash() {
        let data = b"Hello, World!";
        let hash = compute_hash(data);
        assert_eq!(hash.len(), 64); // SHA-256 = 32 bytes = 64 hex chars
        assert!(verify_hash(data, &hash.to_uppercase()));
        assert!(!verify_hash(b"other", &hash));
    }

    #[tokio::test]
    async fn test_local_chunk_storage() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::with_local_storage(temp_dir.path().to_path_buf());

        let session_id = Uuid::new_v4();
        let data = Bytes::from_static(b"test chunk data");

        store.store_chunk(session_id, 0, data.clone()).await.unwrap();

        let retrieved = store.get_chunk(session_id, 0).await.unwrap();
        assert_eq!(retrieved, Some(data));
        assert_eq!(store.get_chunk(session_id, 1).await.unwrap(), None);

        let deleted = store.delete_session_chunks(session_id).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.get_chunk(session_id, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_assembly_uses_index_order() {
        let store = ChunkStore::in_memory();
        let session_id = Uuid::new_v4();

        // Arrive out of order
        store.store_chunk(session_id, 2, Bytes::from_static(b"!")).await.unwrap();
        store.store_chunk(session_id, 0, Bytes::from_static(b"Hello, ")).await.unwrap();
        store.store_chunk(session_id, 1, Bytes::from_static(b"World")).await.unwrap();

        let assembled = store.assemble_chunks(session_id, 3).await.unwrap();
        assert_eq!(&assembled[..], b"Hello, World!");
    }

    #[tokio::test]
    async fn test_resubmission_overwrites() {
        let store = ChunkStore::in_memory();
        let session_id = Uuid::new_v4();

        store.store_chunk(session_id, 0, Bytes::from_static(b"old")).await.unwrap();
        store.store_chunk(session_id, 0, Bytes::from_static(b"new")).await.unwrap();

        let assembled = store.assemble_chunks(session_id, 1).await.unwrap();
        assert_eq!(&assembled[..], b"new");
    }

    #[tokio::test]
    async fn test_missing_chunk_fails_assembly() {
        let store = ChunkStore::in_memory();
        let session_id = Uuid::new_v4();
        store.store_chunk(session_id, 0, Bytes::from_static(b"a")).await.unwrap();

        let result = store.assemble_chunks(session_id, 2).await;
        assert!(matches!(result, Err(UploadError::IncompleteUpload(_))));
    }
}
