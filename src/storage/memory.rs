//! In-memory object store
//!
//! Holds committed objects in a map. Presigned URLs use a `memory://` scheme
//! with the expiry embedded, resolvable through [`MemoryObjectStore::resolve`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;

use crate::error::StorageError;

use super::types::{ObjectReference, StoredObject, TimeBoxedUrl};
use super::ObjectStore;

const SCHEME: &str = "memory://";

#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    objects: RwLock<HashMap<String, StoredObject>>,
    fail_puts: AtomicBool,
    put_delay: RwLock<Option<Duration>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent uploads fail, simulating an unreachable store
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.fail_puts.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every upload, widening race windows in tests
    pub fn set_put_delay(&self, delay: Option<Duration>) {
        *self.inner.put_delay.write() = delay;
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.inner.objects.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch the object behind a presigned `memory://` URL
    pub fn resolve(&self, url: &str) -> Result<Bytes, StorageError> {
        let rest = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| StorageError::ObjectNotFound(url.to_string()))?;
        let (key, query) = rest
            .split_once("?expires=")
            .ok_or_else(|| StorageError::AccessDenied(url.to_string()))?;

        let expires: i64 = query
            .parse()
            .map_err(|_| StorageError::AccessDenied(url.to_string()))?;
        if Utc::now().timestamp_millis() >= expires {
            return Err(StorageError::AccessDenied(format!("expired reference for {}", key)));
        }

        self.get(key)
            .map(|obj| obj.data)
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<ObjectReference, StorageError> {
        let delay = *self.inner.put_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.inner.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionFailed("memory store marked unavailable".to_string()));
        }

        self.inner.objects.write().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                metadata: metadata.clone(),
            },
        );

        Ok(ObjectReference(key.to_string()))
    }

    async fn presign_get(
        &self,
        reference: &ObjectReference,
        ttl: Duration,
    ) -> Result<TimeBoxedUrl, StorageError> {
        if !self.inner.objects.read().contains_key(reference.key()) {
            return Err(StorageError::ObjectNotFound(reference.to_string()));
        }

        let expires_ms = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        let expires_at: DateTime<Utc> = Utc
            .timestamp_millis_opt(expires_ms)
            .single()
            .ok_or_else(|| StorageError::Presign("expiry out of range".to_string()))?;

        Ok(TimeBoxedUrl {
            url: format!("{}{}?expires={}", SCHEME, reference.key(), expires_ms),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_presign() {
        let store = MemoryObjectStore::new();
        let mut metadata = HashMap::new();
        metadata.insert("lecture".to_string(), "intro".to_string());

        let reference = store
            .put_object("videos/a.mp4", Bytes::from_static(b"abc"), "video/mp4", &metadata)
            .await
            .unwrap();
        assert_eq!(reference.key(), "videos/a.mp4");

        let stored = store.get("videos/a.mp4").unwrap();
        assert_eq!(stored.content_type, "video/mp4");
        assert_eq!(stored.metadata.get("lecture").map(String::as_str), Some("intro"));

        let url = store.presign_get(&reference, Duration::from_secs(60)).await.unwrap();
        assert!(!url.is_expired());
        assert_eq!(store.resolve(&url.url).unwrap(), Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn test_expired_reference_is_denied() {
        let store = MemoryObjectStore::new();
        let reference = store
            .put_object("k", Bytes::from_static(b"x"), "video/mp4", &HashMap::new())
            .await
            .unwrap();

        let url = store.presign_get(&reference, Duration::ZERO).await.unwrap();
        assert!(matches!(store.resolve(&url.url), Err(StorageError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryObjectStore::new();
        store.set_unavailable(true);
        let result = store
            .put_object("k", Bytes::new(), "video/mp4", &HashMap::new())
            .await;
        assert!(result.is_err());
        assert!(store.is_empty());
    }
}
