//! Upload types for the resumable chunked-upload protocol

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, StorageError};
use crate::storage::ObjectReference;

// ============================================================================
// Constants
// ============================================================================

/// Request header carrying the hex SHA-256 digest of a chunk body
pub const DIGEST_HEADER: &str = "x-chunk-digest";

/// Metadata key linking an upload to a catalog content id
pub const CONTENT_ID_METADATA: &str = "contentId";

/// Metadata key flagging an encrypted payload
pub const ENCRYPTED_METADATA: &str = "encrypted";

/// Metadata key naming the cipher mode of an encrypted payload
pub const CIPHER_MODE_METADATA: &str = "cipherMode";

// ============================================================================
// Wire Types
// ============================================================================

/// Request to open an upload session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    /// Number of chunks the client will send; must be positive
    pub total_chunks: i64,

    /// Suggested file name, folded into the final object key
    pub destination_key_hint: String,

    /// MIME type of the reassembled file
    pub content_type: String,

    /// Free-form metadata stored with the object
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Optional: declared size of the reassembled file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
}

/// Response to initialize
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Response after uploading a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    /// Number of distinct chunks received so far
    pub received_count: usize,

    /// Total chunks expected
    pub total_chunks: usize,

    /// Whether the bitmap is full
    pub complete: bool,

    /// Committed object reference, present once the session is committed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_reference: Option<String>,
}

/// Response to a status query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub received_count: usize,
    pub total_chunks: usize,
    pub complete: bool,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
}

// ============================================================================
// Session Types
// ============================================================================

/// Session lifecycle
///
/// `Initialized -> Accumulating -> Complete -> Committed`, with `Failed` and
/// `Expired` as the other terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Empty bitmap
    Initialized,
    /// Some but not all chunks received
    Accumulating,
    /// All chunks received, reassembly/commit in progress
    Complete,
    /// Reassembled payload stored durably
    Committed,
    /// Reassembly, commit, or recovery failed; or abandoned by the owner
    Failed,
    /// Expired before completing
    Expired,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Accumulating => "accumulating",
            Self::Complete => "complete",
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "initialized" => Self::Initialized,
            "accumulating" => Self::Accumulating,
            "complete" => Self::Complete,
            "committed" => Self::Committed,
            "failed" => Self::Failed,
            "expired" => Self::Expired,
            _ => return None,
        })
    }

    /// Still collecting chunks
    pub fn is_open(self) -> bool {
        matches!(self, Self::Initialized | Self::Accumulating)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Failed | Self::Expired)
    }
}

/// Why a session ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReason {
    pub kind: ErrorKind,
    pub message: String,
}

impl FailureReason {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Server-side upload session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique, unguessable session ID
    pub id: Uuid,

    /// Principal that created the session
    pub owner_id: String,

    pub total_chunks: usize,

    /// Declared size of the reassembled payload, if the client sent one
    pub total_bytes: Option<u64>,

    /// Indices of chunks that have been received
    pub received: BTreeSet<usize>,

    /// Object key the payload will be committed under
    pub destination_key: String,

    pub content_type: String,

    pub metadata: HashMap<String, String>,

    pub created_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,

    pub state: SessionState,

    /// Set once committed
    pub final_reference: Option<ObjectReference>,

    /// Set once failed
    pub failure: Option<FailureReason>,

    /// Last state change, used for terminal retention
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// Create a new upload session
    pub fn new(
        owner_id: &str,
        total_chunks: usize,
        total_bytes: Option<u64>,
        destination_key: String,
        content_type: &str,
        metadata: HashMap<String, String>,
        ttl: chrono::Duration,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            total_chunks,
            total_bytes,
            received: BTreeSet::new(),
            destination_key,
            content_type: content_type.to_string(),
            metadata,
            created_at: now,
            expires_at: now + ttl,
            state: SessionState::Initialized,
            final_reference: None,
            failure: None,
            updated_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Check if all chunks have been received
    pub fn is_complete(&self) -> bool {
        self.received.len() == self.total_chunks
    }

    /// Get indices of chunks that still need to be uploaded
    pub fn missing_chunks(&self) -> Vec<usize> {
        (0..self.total_chunks)
            .filter(|i| !self.received.contains(i))
            .collect()
    }

    /// Mark a chunk as received; returns false if it was already present
    pub fn mark_received(&mut self, index: usize) -> bool {
        debug_assert!(index < self.total_chunks);
        self.received.insert(index)
    }

    pub fn transition(&mut self, state: SessionState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, reason: FailureReason) {
        self.failure = Some(reason);
        self.transition(SessionState::Failed);
    }

    /// Calculate progress percentage
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 100.0;
        }
        (self.received.len() as f64 / self.total_chunks as f64) * 100.0
    }

    pub fn chunk_response(&self) -> ChunkUploadResponse {
        ChunkUploadResponse {
            received_count: self.received.len(),
            total_chunks: self.total_chunks,
            complete: self.is_complete(),
            final_reference: self.final_reference.as_ref().map(|r| r.to_string()),
        }
    }

    pub fn status_response(&self) -> SessionStatusResponse {
        SessionStatusResponse {
            received_count: self.received.len(),
            total_chunks: self.total_chunks,
            complete: self.is_complete(),
            state: self.state,
            failure_reason: self.failure.clone(),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Chunk index out of range: {index} (total: {total})")]
    IndexOutOfRange { index: usize, total: usize },

    #[error("Chunk {index} digest mismatch: expected {expected}, got {actual}")]
    CorruptedChunk {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("Incomplete upload: {0}")]
    IncompleteUpload(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Side-cache error: {0}")]
    SideCache(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Self::IndexOutOfRange { .. } => ErrorKind::IndexOutOfRange,
            Self::CorruptedChunk { .. } => ErrorKind::CorruptedChunk,
            Self::IncompleteUpload(_) => ErrorKind::IncompleteUpload,
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            Self::SideCache(_) => ErrorKind::Transient,
            Self::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::IndexOutOfRange { .. } => StatusCode::BAD_REQUEST,
            Self::CorruptedChunk { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::IncompleteUpload(_) => StatusCode::CONFLICT,
            Self::StorageUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::SideCache(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for UploadError {
    fn from(e: StorageError) -> Self {
        UploadError::StorageUnavailable(e.to_string())
    }
}
