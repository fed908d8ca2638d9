//! Upload and playback client
//!
//! The creator-facing half slices a source file into chunks sized from the
//! live network profile, stamps each chunk with a digest, and dispatches them
//! through a sliding window with per-chunk retries. The viewer-facing half
//! fetches a time-boxed reference, decrypts off the runtime, and hands out an
//! in-memory playable handle.

pub mod adaptive;
pub mod integrity;
pub mod job;
pub mod playback;
pub mod source;
pub mod transport;
pub mod uploader;

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::error::ErrorKind;

pub use adaptive::{AdaptiveController, AdaptiveProfile, NetworkMonitor, NetworkSample, RetryPolicy};
pub use integrity::{ChunkHasher, ChunkVerifier, Sha256Hasher, VerificationRecord};
pub use job::{JobError, JobEvent, JobHandle, JobRegistry, JobStatus, UploadJob};
pub use playback::{PlayableHandle, PlaybackClient};
pub use source::{FileSource, MemorySource, UploadSource};
pub use transport::{HttpTransport, PlaybackSource, UploadTransport};
pub use uploader::{UploadOptions, UploadOutcome, Uploader, UploaderConfig};

/// Client-side failures
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Error body returned by the server
    #[error("Server rejected request ({status}): {message}")]
    Server {
        kind: ErrorKind,
        status: u16,
        message: String,
    },

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Source read failed: {0}")]
    Source(String),

    /// Source bytes no longer match the digest taken when the chunk was first sliced
    #[error("Source changed under chunk {0}")]
    SourceChanged(usize),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Chunk {index} gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        index: usize,
        attempts: u32,
        last: Box<ClientError>,
    },

    #[error("Playable handle has been revoked")]
    Revoked,

    #[error("Upload canceled")]
    Canceled,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Server { kind, .. } => *kind,
            Self::NetworkUnavailable(_) => ErrorKind::NetworkUnavailable,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Source(_) | Self::SourceChanged(_) => ErrorKind::InvalidArgument,
            Self::Crypto(e) => e.kind(),
            Self::RetriesExhausted { last, .. } => last.kind(),
            Self::Revoked | Self::Canceled => ErrorKind::Canceled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
