//! Decryption & Playback Client
//!
//! Fetches ciphertext through a time-boxed grant, decrypts on the crypto
//! worker under the cipher mode the grant names, and exposes the plaintext only as an in-memory [`PlayableHandle`].
//! Nothing is written to disk. The handle is revoked explicitly when playback
//! ends, or implicitly when the last clone is dropped.

use std::sync::Arc;

use base64::Engine;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::crypto::{CipherMode, ContentKey, CryptoError, CryptoWorker};

use super::transport::PlaybackSource;
use super::ClientError;

struct HandleInner {
    content_id: String,
    mode: Option<CipherMode>,
    data: RwLock<Option<Bytes>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if self.data.get_mut().take().is_some() {
            tracing::debug!(content_id = %self.content_id, "Playable handle released");
        }
    }
}

/// Plaintext video held in memory for the player
#[derive(Clone)]
pub struct PlayableHandle {
    inner: Arc<HandleInner>,
}

impl PlayableHandle {
    fn new(content_id: &str, mode: Option<CipherMode>, data: Bytes) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                content_id: content_id.to_string(),
                mode,
                data: RwLock::new(Some(data)),
            }),
        }
    }

    pub fn content_id(&self) -> &str {
        &self.inner.content_id
    }

    /// Cipher mode the content was decrypted under; `None` for clear content
    pub fn mode(&self) -> Option<CipherMode> {
        self.inner.mode
    }

    pub fn bytes(&self) -> Result<Bytes, ClientError> {
        self.inner.data.read().clone().ok_or(ClientError::Revoked)
    }

    pub fn len(&self) -> usize {
        self.inner.data.read().as_ref().map_or(0, Bytes::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the plaintext; every clone sees the revocation
    pub fn revoke(&self) {
        if self.inner.data.write().take().is_some() {
            tracing::debug!(content_id = %self.inner.content_id, "Playable handle revoked");
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.inner.data.read().is_none()
    }
}

impl std::fmt::Debug for PlayableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayableHandle")
            .field("content_id", &self.inner.content_id)
            .field("mode", &self.inner.mode)
            .field("revoked", &self.is_revoked())
            .finish()
    }
}

#[derive(Clone)]
pub struct PlaybackClient {
    source: Arc<dyn PlaybackSource>,
    worker: CryptoWorker,
}

impl PlaybackClient {
    pub fn new(source: Arc<dyn PlaybackSource>, worker: CryptoWorker) -> Self {
        Self { source, worker }
    }

    /// Fetch, decrypt and wrap `content_id` for playback
    pub async fn open(&self, content_id: &str) -> Result<PlayableHandle, ClientError> {
        let grant = self.source.fetch_grant(content_id).await?;
        tracing::debug!(
            content_id = %content_id,
            encrypted = grant.encrypted,
            expires_at = %grant.expires_at,
            "Playback grant received"
        );

        let data = self.source.fetch_bytes(&grant.url).await?;

        if !grant.encrypted {
            return Ok(PlayableHandle::new(content_id, None, data));
        }

        let key = grant
            .key
            .as_deref()
            .ok_or(ClientError::Crypto(CryptoError::Undecryptable))
            .and_then(decode_key)?;
        let mode = grant.cipher_mode.unwrap_or(CipherMode::Aead);

        match self.worker.decrypt(data, key, mode).await {
            Ok(plaintext) => {
                tracing::info!(
                    content_id = %content_id,
                    mode = mode.as_str(),
                    size = plaintext.len(),
                    "Content decrypted"
                );
                Ok(PlayableHandle::new(content_id, Some(mode), Bytes::from(plaintext)))
            }
            Err(e) => {
                tracing::warn!(
                    content_id = %content_id,
                    mode = mode.as_str(),
                    error = %e,
                    "Content undecryptable, aborting playback"
                );
                Err(e.into())
            }
        }
    }
}

fn decode_key(encoded: &str) -> Result<ContentKey, ClientError> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| ClientError::Crypto(CryptoError::Undecryptable))?;
    ContentKey::from_slice(&raw).map_err(|_| ClientError::Crypto(CryptoError::Undecryptable))
}
