//! Error taxonomy shared by the server and client halves of ReelSafe
//!
//! Every layer has its own `thiserror` enum; each one maps onto a single
//! [`ErrorKind`] so callers can decide between retrying and giving up without
//! matching on layer-specific variants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classes visible to callers and UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidArgument,
    Unauthorized,
    SessionNotFound,
    IndexOutOfRange,
    CorruptedChunk,
    IncompleteUpload,
    StorageUnavailable,
    UndecryptableContent,
    NetworkUnavailable,
    /// Server or transport hiccup worth another attempt
    Transient,
    Canceled,
    Internal,
}

impl ErrorKind {
    /// Whether the chunk-level retry loop may recover from this failure.
    ///
    /// `CorruptedChunk` is recovered by re-slicing rather than a blind retry,
    /// but from the caller's point of view it is still recoverable.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NetworkUnavailable | Self::Transient | Self::CorruptedChunk
        )
    }

    /// Stable machine-readable code used in HTTP error bodies
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::IndexOutOfRange => "INDEX_OUT_OF_RANGE",
            Self::CorruptedChunk => "CORRUPTED_CHUNK",
            Self::IncompleteUpload => "INCOMPLETE_UPLOAD",
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
            Self::UndecryptableContent => "UNDECRYPTABLE_CONTENT",
            Self::NetworkUnavailable => "NETWORK_UNAVAILABLE",
            Self::Transient => "TRANSIENT",
            Self::Canceled => "CANCELED",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Inverse of [`ErrorKind::code`]; unknown codes collapse to `Internal`
    pub fn from_code(code: &str) -> Self {
        match code {
            "INVALID_ARGUMENT" => Self::InvalidArgument,
            "UNAUTHORIZED" => Self::Unauthorized,
            "SESSION_NOT_FOUND" => Self::SessionNotFound,
            "INDEX_OUT_OF_RANGE" => Self::IndexOutOfRange,
            "CORRUPTED_CHUNK" => Self::CorruptedChunk,
            "INCOMPLETE_UPLOAD" => Self::IncompleteUpload,
            "STORAGE_UNAVAILABLE" => Self::StorageUnavailable,
            "UNDECRYPTABLE_CONTENT" => Self::UndecryptableContent,
            "NETWORK_UNAVAILABLE" => Self::NetworkUnavailable,
            "TRANSIENT" => Self::Transient,
            "CANCELED" => Self::Canceled,
            _ => Self::Internal,
        }
    }
}

/// Object-store errors
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("S3 connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Presigning failed: {0}")]
    Presign(String),

    #[error("S3 SDK error: {0}")]
    SdkError(String),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ObjectNotFound(_) => ErrorKind::SessionNotFound,
            Self::AccessDenied(_) => ErrorKind::Unauthorized,
            _ => ErrorKind::StorageUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_split() {
        assert!(ErrorKind::NetworkUnavailable.is_retryable());
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::CorruptedChunk.is_retryable());

        assert!(!ErrorKind::Unauthorized.is_retryable());
        assert!(!ErrorKind::InvalidArgument.is_retryable());
        assert!(!ErrorKind::UndecryptableContent.is_retryable());
        assert!(!ErrorKind::StorageUnavailable.is_retryable());
    }

    #[test]
    fn test_code_roundtrip() {
        for kind in [
            ErrorKind::SessionNotFound,
            ErrorKind::CorruptedChunk,
            ErrorKind::StorageUnavailable,
            ErrorKind::Canceled,
        ] {
            assert_eq!(ErrorKind::from_code(kind.code()), kind);
        }
        assert_eq!(ErrorKind::from_code("WHATEVER"), ErrorKind::Internal);
    }
}
