//! Durable Store Committer
//!
//! Streams a reassembled payload to the object store. There is no internal
//! retry: once reassembled bytes are handed over they are not retained, so a
//! failed commit forces the client to start a fresh session.
//!
//! Catalog linking runs after the object is durable. A link the catalog
//! refuses, such as a content id owned by another principal, leaves the
//! object committed but unlinked.

use std::sync::Arc;

use bytes::Bytes;

use crate::catalog::{CatalogError, ContentCatalog};
use crate::crypto::CipherMode;
use crate::storage::{ObjectReference, ObjectStore};

use super::types::{
    UploadError, UploadSession, CIPHER_MODE_METADATA, CONTENT_ID_METADATA, ENCRYPTED_METADATA,
};

#[derive(Clone)]
pub struct Committer {
    store: Arc<dyn ObjectStore>,
    catalog: Option<Arc<dyn ContentCatalog>>,
}

impl Committer {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            catalog: None,
        }
    }

    /// Link committed objects to catalog entries named by the `contentId` metadata key
    pub fn with_catalog(mut self, catalog: Arc<dyn ContentCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub async fn commit(
        &self,
        session: &UploadSession,
        payload: Bytes,
    ) -> Result<ObjectReference, UploadError> {
        let size = payload.len();

        let reference = self
            .store
            .put_object(
                &session.destination_key,
                payload,
                &session.content_type,
                &session.metadata,
            )
            .await
            .map_err(|e| {
                tracing::error!(
                    session_id = %session.id,
                    key = %session.destination_key,
                    error = %e,
                    "Commit to object store failed"
                );
                UploadError::StorageUnavailable(e.to_string())
            })?;

        tracing::info!(
            session_id = %session.id,
            reference = %reference,
            size = size,
            "Upload committed"
        );

        if let (Some(catalog), Some(content_id)) =
            (&self.catalog, session.metadata.get(CONTENT_ID_METADATA))
        {
            let cipher_mode = cipher_mode(session);

            // The object is already durable; a catalog refusal must not undo that
            match catalog
                .link_object(content_id, &session.owner_id, &reference, cipher_mode)
                .await
            {
                Ok(()) => {
                    tracing::debug!(
                        session_id = %session.id,
                        content_id = %content_id,
                        "Committed object linked to catalog"
                    );
                }
                Err(e @ CatalogError::NotOwner { .. }) => {
                    tracing::warn!(
                        session_id = %session.id,
                        owner_id = %session.owner_id,
                        content_id = %content_id,
                        error = %e,
                        "Refusing to link object to content owned by another principal"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %session.id,
                        content_id = %content_id,
                        error = %e,
                        "Failed to link committed object to catalog"
                    );
                }
            }
        }

        Ok(reference)
    }
}

/// Cipher mode declared in session metadata; `None` for clear uploads
fn cipher_mode(session: &UploadSession) -> Option<CipherMode> {
    let encrypted = session
        .metadata
        .get(ENCRYPTED_METADATA)
        .is_some_and(|v| v == "true");
    if !encrypted {
        return None;
    }

    match session.metadata.get(CIPHER_MODE_METADATA) {
        None => Some(CipherMode::Aead),
        Some(name) => Some(CipherMode::parse(name).unwrap_or_else(|| {
            tracing::warn!(
                session_id = %session.id,
                cipher_mode = %name,
                "Unknown cipher mode in metadata, recording as AEAD"
            );
            CipherMode::Aead
        })),
    }
}
