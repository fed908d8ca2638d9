//! Background crypto worker
//!
//! Encryption and decryption of whole video payloads run on a dedicated OS
//! thread so they never stall the async runtime. Callers talk to it only by
//! message: each request carries a correlation id and a one-shot reply
//! channel, and the reply echoes the id back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use super::cipher::{self, CipherMode, ContentKey, CryptoError, EncryptedPayload};

enum CryptoOp {
    Encrypt { plaintext: Bytes, key: ContentKey },
    Decrypt { data: Bytes, key: ContentKey, mode: CipherMode },
}

enum CryptoOutput {
    Encrypted(EncryptedPayload),
    Decrypted(Vec<u8>),
}

struct CryptoRequest {
    id: u64,
    op: CryptoOp,
    reply: oneshot::Sender<CryptoReply>,
}

struct CryptoReply {
    id: u64,
    result: Result<CryptoOutput, CryptoError>,
}

/// Handle to the crypto thread; cheap to clone
#[derive(Clone)]
pub struct CryptoWorker {
    tx: mpsc::UnboundedSender<CryptoRequest>,
    next_id: Arc<AtomicU64>,
}

impl CryptoWorker {
    /// Spawn the worker thread. It exits once every handle is dropped.
    pub fn start() -> Result<Self, CryptoError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<CryptoRequest>();

        std::thread::Builder::new()
            .name("reelsafe-crypto".to_string())
            .spawn(move || {
                tracing::debug!("Crypto worker started");
                while let Some(request) = rx.blocking_recv() {
                    let result = match request.op {
                        CryptoOp::Encrypt { plaintext, key } => {
                            cipher::encrypt(&plaintext, &key).map(CryptoOutput::Encrypted)
                        }
                        CryptoOp::Decrypt { data, key, mode } => {
                            cipher::decrypt(&data, &key, mode).map(CryptoOutput::Decrypted)
                        }
                    };

                    // Caller may have given up; nothing to do then
                    let _ = request.reply.send(CryptoReply {
                        id: request.id,
                        result,
                    });
                }
                tracing::debug!("Crypto worker stopped");
            })
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to spawn crypto worker");
                CryptoError::WorkerUnavailable
            })?;

        Ok(Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Encrypt under the primary mode. The returned payload always carries its IV.
    pub async fn encrypt(&self, plaintext: Bytes, key: ContentKey) -> Result<EncryptedPayload, CryptoError> {
        match self.call(CryptoOp::Encrypt { plaintext, key }).await? {
            CryptoOutput::Encrypted(payload) => {
                payload.validate()?;
                Ok(payload)
            }
            CryptoOutput::Decrypted(_) => Err(CryptoError::WorkerUnavailable),
        }
    }

    /// Decrypt wire bytes under the content's recorded cipher mode
    pub async fn decrypt(
        &self,
        data: Bytes,
        key: ContentKey,
        mode: CipherMode,
    ) -> Result<Vec<u8>, CryptoError> {
        match self.call(CryptoOp::Decrypt { data, key, mode }).await? {
            CryptoOutput::Decrypted(plaintext) => Ok(plaintext),
            CryptoOutput::Encrypted(_) => Err(CryptoError::WorkerUnavailable),
        }
    }

    async fn call(&self, op: CryptoOp) -> Result<CryptoOutput, CryptoError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();

        self.tx
            .send(CryptoRequest {
                id,
                op,
                reply: reply_tx,
            })
            .map_err(|_| CryptoError::WorkerUnavailable)?;

        let reply = reply_rx.await.map_err(|_| CryptoError::WorkerUnavailable)?;
        if reply.id != id {
            return Err(CryptoError::CorrelationMismatch {
                expected: id,
                actual: reply.id,
            });
        }

        reply.result
    }
}
