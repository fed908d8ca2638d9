//! Client-visible upload jobs
//!
//! A job moves `queued -> uploading -> reassembling -> complete`, or ends in
//! `failed` / `canceled`. Progress never goes backwards and stays below 100
//! until the committed reference is known. Every change is broadcast as a
//! [`JobEvent`]; terminal jobs are dropped from the registry after a grace
//! period so the UI can still show the final state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ErrorKind;

use super::ClientError;

/// Default time a terminal job stays visible
pub const DEFAULT_GC_GRACE: Duration = Duration::from_secs(30);

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Uploading,
    Reassembling,
    Complete,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Canceled)
    }
}

/// Terminal failure reason shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&ClientError> for JobError {
    fn from(e: &ClientError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
            retryable: e.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub error: Option<JobError>,
    pub final_reference: Option<String>,
}

/// Status change broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub error: Option<JobError>,
}

// ============================================================================
// Job Handle
// ============================================================================

/// Write side of one job, held by the uploader driving it
#[derive(Clone)]
pub struct JobHandle {
    id: Uuid,
    state: Arc<watch::Sender<UploadJob>>,
    events: broadcast::Sender<JobEvent>,
    cancel: CancellationToken,
    finished_at: Arc<RwLock<Option<Instant>>>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn snapshot(&self) -> UploadJob {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadJob> {
        self.state.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn set_status(&self, status: JobStatus) {
        self.update(|job| {
            if job.status == status || job.status.is_terminal() {
                return false;
            }
            job.status = status;
            true
        });
    }

    /// Raise progress; lower values are ignored and 100 is reserved for completion
    pub fn set_progress(&self, percent: u8) {
        let percent = percent.min(99);
        self.update(|job| {
            if job.status.is_terminal() || percent <= job.progress_percent {
                return false;
            }
            job.progress_percent = percent;
            true
        });
    }

    pub fn complete(&self, final_reference: String) {
        self.finish(|job| {
            job.status = JobStatus::Complete;
            job.progress_percent = 100;
            job.final_reference = Some(final_reference);
        });
    }

    pub fn fail(&self, error: &ClientError) {
        let error = JobError::from(error);
        self.finish(|job| {
            job.status = JobStatus::Failed;
            job.error = Some(error);
        });
    }

    pub fn mark_canceled(&self) {
        self.finish(|job| {
            job.status = JobStatus::Canceled;
            job.error = Some(JobError::from(&ClientError::Canceled));
        });
    }

    fn finish(&self, apply: impl FnOnce(&mut UploadJob)) {
        let changed = self.update(|job| {
            if job.status.is_terminal() {
                return false;
            }
            apply(job);
            true
        });
        if changed {
            *self.finished_at.write() = Some(Instant::now());
        }
    }

    fn update(&self, modify: impl FnOnce(&mut UploadJob) -> bool) -> bool {
        let mut event = None;
        self.state.send_if_modified(|job| {
            let changed = modify(job);
            if changed {
                event = Some(JobEvent {
                    job_id: job.id,
                    status: job.status,
                    progress_percent: job.progress_percent,
                    error: job.error.clone(),
                });
            }
            changed
        });

        match event {
            Some(event) => {
                // No subscribers is fine
                let _ = self.events.send(event);
                true
            }
            None => false,
        }
    }

    fn finished_at(&self) -> Option<Instant> {
        *self.finished_at.read()
    }
}

// ============================================================================
// Job Registry
// ============================================================================

/// Every live job of this client, keyed by id
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    jobs: RwLock<HashMap<Uuid, JobHandle>>,
    events: broadcast::Sender<JobEvent>,
    grace: Duration,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_GC_GRACE)
    }
}

impl JobRegistry {
    pub fn new(grace: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                jobs: RwLock::new(HashMap::new()),
                events,
                grace,
            }),
        }
    }

    /// Register a new job in `queued`
    pub fn create(&self) -> JobHandle {
        let id = Uuid::new_v4();
        let (state, _) = watch::channel(UploadJob {
            id,
            status: JobStatus::Queued,
            progress_percent: 0,
            error: None,
            final_reference: None,
        });

        let handle = JobHandle {
            id,
            state: Arc::new(state),
            events: self.inner.events.clone(),
            cancel: CancellationToken::new(),
            finished_at: Arc::new(RwLock::new(None)),
        };

        self.inner.jobs.write().insert(id, handle.clone());
        let _ = self.inner.events.send(JobEvent {
            job_id: id,
            status: JobStatus::Queued,
            progress_percent: 0,
            error: None,
        });

        handle
    }

    pub fn get(&self, id: Uuid) -> Option<UploadJob> {
        self.inner.jobs.read().get(&id).map(JobHandle::snapshot)
    }

    pub fn handle(&self, id: Uuid) -> Option<JobHandle> {
        self.inner.jobs.read().get(&id).cloned()
    }

    /// Stream of status changes for every job
    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Request cancellation; false if the job is unknown
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.handle(id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop terminal jobs whose grace period has elapsed; returns the number removed
    pub fn collect_garbage(&self) -> usize {
        let now = Instant::now();
        let grace = self.inner.grace;
        let mut jobs = self.inner.jobs.write();
        let before = jobs.len();

        jobs.retain(|_, handle| match handle.finished_at() {
            Some(finished) => now.duration_since(finished) < grace,
            None => true,
        });

        let removed = before - jobs.len();
        if removed > 0 {
            tracing::debug!(count = removed, "Collected finished upload jobs");
        }
        removed
    }

    /// Start background garbage collection
    pub fn start_gc_task(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.collect_garbage();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_monotonic_and_capped() {
        let registry = JobRegistry::default();
        let job = registry.create();

        job.set_status(JobStatus::Uploading);
        job.set_progress(40);
        job.set_progress(20);
        assert_eq!(job.snapshot().progress_percent, 40);

        job.set_progress(100);
        assert_eq!(job.snapshot().progress_percent, 99);

        job.complete("videos/a".into());
        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Complete);
        assert_eq!(snapshot.progress_percent, 100);

        // Terminal states are sticky
        job.fail(&ClientError::Transient("late".into()));
        assert_eq!(job.snapshot().status, JobStatus::Complete);
    }

    #[test]
    fn test_failure_carries_kind_and_retryability() {
        let registry = JobRegistry::default();
        let job = registry.create();
        job.fail(&ClientError::NetworkUnavailable("offline".into()));

        let error = registry.get(job.id()).unwrap().error.unwrap();
        assert_eq!(error.kind, ErrorKind::NetworkUnavailable);
        assert!(error.retryable);
    }

    #[tokio::test]
    async fn test_events_are_broadcast_in_order() {
        let registry = JobRegistry::default();
        let mut events = registry.events();
        let job = registry.create();

        job.set_status(JobStatus::Uploading);
        job.set_progress(50);
        job.set_status(JobStatus::Reassembling);
        job.complete("videos/a".into());

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            statuses.push((event.status, event.progress_percent));
        }
        assert_eq!(
            statuses,
            vec![
                (JobStatus::Queued, 0),
                (JobStatus::Uploading, 0),
                (JobStatus::Uploading, 50),
                (JobStatus::Reassembling, 50),
                (JobStatus::Complete, 100),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_after_grace() {
        let registry = JobRegistry::new(Duration::from_secs(30));
        let done = registry.create();
        let running = registry.create();
        done.complete("videos/a".into());
        running.set_status(JobStatus::Uploading);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(registry.collect_garbage(), 0);

        tokio::time::advance(Duration::from_secs(25)).await;
        assert_eq!(registry.collect_garbage(), 1);
        assert!(registry.get(done.id()).is_none());
        assert!(registry.get(running.id()).is_some());
    }

    #[test]
    fn test_cancel_through_registry() {
        let registry = JobRegistry::default();
        let job = registry.create();
        assert!(registry.cancel(job.id()));
        assert!(job.is_canceled());
        assert!(!registry.cancel(Uuid::new_v4()));
    }
}
