//! Storage module for S3-compatible backends
//!
//! Supports MinIO, Cloudflare R2, Backblaze B2, and AWS S3. An in-memory
//! backend is provided for single-process setups and tests.

mod memory;
mod s3_client;
mod types;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;

pub use memory::MemoryObjectStore;
pub use s3_client::S3Client;
pub use types::*;

/// Durable object store behind the upload committer and playback grants
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a complete object and return a stable reference to it
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<ObjectReference, StorageError>;

    /// Produce a read URL for `reference` that stops working after `ttl`
    async fn presign_get(
        &self,
        reference: &ObjectReference,
        ttl: Duration,
    ) -> Result<TimeBoxedUrl, StorageError>;
}
