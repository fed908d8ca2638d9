//! Sliding-window chunk uploader
//!
//! Drives one upload job end to end:
//! - Optional whole-payload encryption on the crypto worker
//! - Chunk size fixed at session start; concurrency re-read from the live
//!   profile before every dispatch, so a network change only affects chunks
//!   that have not been sent yet
//! - Independent per-chunk retries with jittered backoff
//! - Digest rejections re-slice the chunk from the source before resending
//! - Offline periods park the chunk without consuming attempts
//! - Cooperative cancellation with a best-effort session abandon

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::crypto::{CipherMode, ContentKey, CryptoWorker};
use crate::error::ErrorKind;
use crate::upload::{
    ChunkUploadResponse, InitializeRequest, CIPHER_MODE_METADATA, ENCRYPTED_METADATA,
};

use super::adaptive::{AdaptiveController, RetryPolicy};
use super::integrity::ChunkVerifier;
use super::job::{JobHandle, JobRegistry, JobStatus};
use super::source::{MemorySource, UploadSource};
use super::transport::UploadTransport;
use super::ClientError;

#[derive(Debug, Clone, Default)]
pub struct UploaderConfig {
    pub retry: RetryPolicy,
}

/// What to upload and where
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub destination_key_hint: String,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
    /// Encrypt the whole payload before slicing
    pub encryption_key: Option<ContentKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub session_id: String,
    pub final_reference: String,
    pub total_chunks: usize,
}

/// Shared per-job context handed to every chunk task
struct ChunkContext {
    transport: Arc<dyn UploadTransport>,
    controller: AdaptiveController,
    verifier: Arc<ChunkVerifier>,
    retry: RetryPolicy,
    source: Arc<dyn UploadSource>,
    session_id: String,
    chunk_bytes: usize,
    total_len: u64,
    cancel: CancellationToken,
}

impl ChunkContext {
    fn range(&self, index: usize) -> (u64, usize) {
        let offset = index as u64 * self.chunk_bytes as u64;
        let len = (self.total_len - offset).min(self.chunk_bytes as u64) as usize;
        (offset, len)
    }
}

#[derive(Clone)]
pub struct Uploader {
    transport: Arc<dyn UploadTransport>,
    controller: AdaptiveController,
    verifier: Arc<ChunkVerifier>,
    registry: JobRegistry,
    crypto: Option<CryptoWorker>,
    config: UploaderConfig,
}

impl Uploader {
    pub fn new(
        transport: Arc<dyn UploadTransport>,
        controller: AdaptiveController,
        registry: JobRegistry,
        config: UploaderConfig,
    ) -> Self {
        Self {
            transport,
            controller,
            verifier: Arc::new(ChunkVerifier::default()),
            registry,
            crypto: None,
            config,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<ChunkVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Worker used for payload encryption; started on demand otherwise
    pub fn with_crypto_worker(mut self, worker: CryptoWorker) -> Self {
        self.crypto = Some(worker);
        self
    }

    pub fn verifier(&self) -> &Arc<ChunkVerifier> {
        &self.verifier
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Queue an upload and drive it in the background
    pub fn start(
        &self,
        source: Arc<dyn UploadSource>,
        options: UploadOptions,
    ) -> (JobHandle, tokio::task::JoinHandle<Result<UploadOutcome, ClientError>>) {
        let job = self.registry.create();
        let uploader = self.clone();
        let task_job = job.clone();
        let task = tokio::spawn(async move { uploader.run(&task_job, source, options).await });
        (job, task)
    }

    /// Drive `job` to a terminal status
    pub async fn run(
        &self,
        job: &JobHandle,
        source: Arc<dyn UploadSource>,
        options: UploadOptions,
    ) -> Result<UploadOutcome, ClientError> {
        let mut session_id = None;
        let result = self.drive(job, source, options, &mut session_id).await;

        match &result {
            Ok(outcome) => {
                tracing::info!(
                    job_id = %job.id(),
                    session_id = %outcome.session_id,
                    reference = %outcome.final_reference,
                    "Upload complete"
                );
                job.complete(outcome.final_reference.clone());
            }
            Err(e) => {
                if let Some(id) = &session_id {
                    if let Err(abandon_err) = self.transport.abandon(id).await {
                        tracing::debug!(session_id = %id, error = %abandon_err, "Abandon failed");
                    }
                }
                if matches!(e, ClientError::Canceled) {
                    tracing::info!(job_id = %job.id(), "Upload canceled");
                    job.mark_canceled();
                } else {
                    tracing::warn!(job_id = %job.id(), error = %e, kind = ?e.kind(), "Upload failed");
                    job.fail(e);
                }
            }
        }

        result
    }

    async fn drive(
        &self,
        job: &JobHandle,
        source: Arc<dyn UploadSource>,
        mut options: UploadOptions,
        session_out: &mut Option<String>,
    ) -> Result<UploadOutcome, ClientError> {
        let cancel = job.cancel_token();

        let source = match options.encryption_key.take() {
            Some(key) => {
                options
                    .metadata
                    .insert(ENCRYPTED_METADATA.to_string(), "true".to_string());
                options.metadata.insert(
                    CIPHER_MODE_METADATA.to_string(),
                    CipherMode::Aead.as_str().to_string(),
                );
                self.encrypt_source(source, key).await?
            }
            None => source,
        };

        let total_len = source.len();
        if total_len == 0 {
            return Err(ClientError::Source("source is empty".to_string()));
        }

        let profile = self.controller.profile(total_len);
        let chunk_bytes = profile.chunk_bytes;
        let total_chunks = total_len.div_ceil(chunk_bytes as u64) as usize;

        tracing::info!(
            job_id = %job.id(),
            size = total_len,
            chunk_bytes = chunk_bytes,
            total_chunks = total_chunks,
            concurrency = profile.concurrency,
            "Starting upload"
        );

        let request = InitializeRequest {
            total_chunks: total_chunks as i64,
            destination_key_hint: options.destination_key_hint.clone(),
            content_type: options.content_type.clone(),
            metadata: options.metadata.clone(),
            total_bytes: Some(total_len),
        };
        let init = self.initialize_with_retry(&request, &cancel).await?;
        *session_out = Some(init.session_id.clone());
        job.set_status(JobStatus::Uploading);

        let ctx = Arc::new(ChunkContext {
            transport: self.transport.clone(),
            controller: self.controller.clone(),
            verifier: self.verifier.clone(),
            retry: self.config.retry,
            source,
            session_id: init.session_id.clone(),
            chunk_bytes,
            total_len,
            cancel: cancel.clone(),
        });

        let final_reference = self.dispatch(job, &ctx, total_chunks).await?;

        Ok(UploadOutcome {
            session_id: init.session_id,
            final_reference,
            total_chunks,
        })
    }

    /// Sliding window: a finished chunk immediately admits the next queued one
    async fn dispatch(
        &self,
        job: &JobHandle,
        ctx: &Arc<ChunkContext>,
        total_chunks: usize,
    ) -> Result<String, ClientError> {
        let mut queue: VecDeque<usize> = (0..total_chunks).collect();
        let mut in_flight: JoinSet<Result<(usize, ChunkUploadResponse), ClientError>> = JoinSet::new();
        let mut acked: BTreeSet<usize> = BTreeSet::new();
        let mut final_reference = None;
        let mut last_k = 0;

        loop {
            if ctx.cancel.is_cancelled() {
                in_flight.abort_all();
                return Err(ClientError::Canceled);
            }

            let k = self.controller.profile(ctx.total_len).concurrency.max(1);
            if k != last_k {
                tracing::debug!(session_id = %ctx.session_id, concurrency = k, "Concurrency set");
                last_k = k;
            }

            while in_flight.len() < k {
                let Some(index) = queue.pop_front() else {
                    break;
                };
                let ctx = ctx.clone();
                in_flight.spawn(async move { send_chunk(&ctx, index).await });
            }

            if queue.is_empty() && total_chunks - acked.len() <= 1 {
                job.set_status(JobStatus::Reassembling);
            }

            let joined = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    in_flight.abort_all();
                    return Err(ClientError::Canceled);
                }
                joined = in_flight.join_next() => joined,
            };

            let Some(joined) = joined else {
                break;
            };

            let (index, response) = match joined {
                Ok(Ok(done)) => done,
                Ok(Err(e)) => {
                    in_flight.abort_all();
                    return Err(e);
                }
                Err(join_err) => {
                    in_flight.abort_all();
                    return Err(ClientError::Transient(format!("chunk task failed: {}", join_err)));
                }
            };

            acked.insert(index);
            let percent = (acked.len() * 100 / total_chunks) as u8;
            job.set_progress(percent);

            if let Some(reference) = response.final_reference {
                final_reference = Some(reference);
            }
        }

        match final_reference {
            Some(reference) => Ok(reference),
            None => {
                // Every chunk acknowledged but no commit seen; ask the receiver why
                let status = ctx.transport.status(&ctx.session_id).await?;
                let reason = status.failure_reason.map(|f| (f.kind, f.message));
                let (kind, message) = reason.unwrap_or((
                    ErrorKind::IncompleteUpload,
                    format!(
                        "{} of {} chunks acknowledged without a committed reference",
                        status.received_count, status.total_chunks
                    ),
                ));
                Err(ClientError::Server {
                    kind,
                    status: 409,
                    message,
                })
            }
        }
    }

    async fn initialize_with_retry(
        &self,
        request: &InitializeRequest,
        cancel: &CancellationToken,
    ) -> Result<crate::upload::InitializeResponse, ClientError> {
        let retry = self.config.retry;
        let mut attempt = 0;
        loop {
            match self.transport.initialize(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.kind() == ErrorKind::NetworkUnavailable && !self.controller.is_online() => {
                    self.controller.wait_online(cancel).await?;
                }
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    if attempt >= retry.max_attempts {
                        return Err(e);
                    }
                    let delay = retry.delay(attempt, self.controller.sample().rtt_ms);
                    tracing::warn!(attempt = attempt, delay_ms = delay.as_millis() as u64, error = %e, "Initialize failed, retrying");
                    sleep_or_cancel(delay, cancel).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn encrypt_source(
        &self,
        source: Arc<dyn UploadSource>,
        key: ContentKey,
    ) -> Result<Arc<dyn UploadSource>, ClientError> {
        let worker = match &self.crypto {
            Some(worker) => worker.clone(),
            None => CryptoWorker::start()?,
        };

        let plaintext = source.read_all().await?;
        let payload = worker.encrypt(plaintext, key).await?;
        let wire = payload.to_bytes();

        tracing::debug!(size = wire.len(), mode = payload.mode.as_str(), "Payload encrypted");
        Ok(Arc::new(MemorySource::new(Bytes::from(wire))))
    }
}

/// Deliver one chunk, retrying on its own schedule
async fn send_chunk(ctx: &ChunkContext, index: usize) -> Result<(usize, ChunkUploadResponse), ClientError> {
    let (offset, len) = ctx.range(index);
    let mut payload = ctx.source.read_range(offset, len).await?;
    let digest = ctx.verifier.compute(&payload);
    let mut attempt: u32 = 0;

    loop {
        if ctx.cancel.is_cancelled() {
            return Err(ClientError::Canceled);
        }

        let result = ctx
            .transport
            .upload_chunk(&ctx.session_id, index, payload.clone(), &digest)
            .await;

        let err = match result {
            Ok(response) => {
                tracing::debug!(
                    session_id = %ctx.session_id,
                    chunk_index = index,
                    received = response.received_count,
                    total = response.total_chunks,
                    "Chunk acknowledged"
                );
                return Ok((index, response));
            }
            Err(e) => e,
        };

        let kind = err.kind();

        // Offline: wait for the network without burning an attempt
        if kind == ErrorKind::NetworkUnavailable && !ctx.controller.is_online() {
            tracing::debug!(chunk_index = index, "Network offline, pausing chunk");
            ctx.controller.wait_online(&ctx.cancel).await?;
            continue;
        }

        if !kind.is_retryable() {
            return Err(err);
        }

        attempt += 1;
        if attempt >= ctx.retry.max_attempts {
            return Err(ClientError::RetriesExhausted {
                index,
                attempts: attempt,
                last: Box::new(err),
            });
        }

        if kind == ErrorKind::CorruptedChunk {
            ctx.verifier
                .record(index, &digest, "rejected by receiver".to_string(), false);
            tracing::warn!(
                session_id = %ctx.session_id,
                chunk_index = index,
                attempt = attempt,
                "Chunk rejected as corrupted, re-slicing from source"
            );

            payload = ctx.source.read_range(offset, len).await?;
            if !ctx.verifier.verify(index, &payload, &digest) {
                return Err(ClientError::SourceChanged(index));
            }
            continue;
        }

        let delay = ctx.retry.delay(attempt, ctx.controller.sample().rtt_ms);
        tracing::warn!(
            session_id = %ctx.session_id,
            chunk_index = index,
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Chunk failed, retrying"
        );
        sleep_or_cancel(delay, &ctx.cancel).await?;
    }
}

async fn sleep_or_cancel(delay: std::time::Duration, cancel: &CancellationToken) -> Result<(), ClientError> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = cancel.cancelled() => Err(ClientError::Canceled),
    }
}
