//! Adaptive Upload Controller
//!
//! Maps the live network profile onto a chunk size and a concurrency level,
//! and owns the retry backoff schedule.
//!
//! | Downlink          | Chunk   | Concurrency |
//! |-------------------|---------|-------------|
//! | < 1 Mbps or RTT ≥ 1 s | 512 KiB | 1 |
//! | < 5 Mbps          | 1 MiB   | 2           |
//! | < 10 Mbps         | 5 MiB   | 4           |
//! | ≥ 10 Mbps         | 10 MiB  | 8           |
//!
//! Data-saving mode caps the chunk at 1 MiB and concurrency at 2.

use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::ClientError;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

pub const MIN_CHUNK_BYTES: usize = 512 * KIB;
pub const MAX_CHUNK_BYTES: usize = 10 * MIB;
pub const SAVE_DATA_CHUNK_BYTES: usize = MIB;
pub const MAX_CONCURRENCY: usize = 8;
pub const SAVE_DATA_CONCURRENCY: usize = 2;

// ============================================================================
// Network Signals
// ============================================================================

/// One network-change observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkSample {
    pub downlink_mbps: f64,
    pub rtt_ms: u64,
    pub save_data: bool,
    pub online: bool,
}

impl Default for NetworkSample {
    /// Assumed profile before anything has been measured
    fn default() -> Self {
        Self {
            downlink_mbps: 10.0,
            rtt_ms: 100,
            save_data: false,
            online: true,
        }
    }
}

/// Publishes network-change signals to every controller subscribed to it
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: watch::Sender<NetworkSample>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkSample::default())
    }
}

impl NetworkMonitor {
    pub fn new(initial: NetworkSample) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn publish(&self, sample: NetworkSample) {
        tracing::debug!(
            downlink_mbps = sample.downlink_mbps,
            rtt_ms = sample.rtt_ms,
            save_data = sample.save_data,
            online = sample.online,
            "Network change"
        );
        self.tx.send_replace(sample);
    }

    pub fn set_online(&self, online: bool) {
        let mut sample = self.current();
        sample.online = online;
        self.publish(sample);
    }

    /// Fold a measured round trip into the current sample
    pub fn record_rtt(&self, rtt: Duration) {
        let mut sample = self.current();
        sample.rtt_ms = rtt.as_millis() as u64;
        self.publish(sample);
    }

    pub fn current(&self) -> NetworkSample {
        *self.tx.borrow()
    }

    pub fn controller(&self) -> AdaptiveController {
        AdaptiveController {
            rx: self.tx.subscribe(),
            max_chunk_bytes: None,
        }
    }
}

// ============================================================================
// Adaptive Profile
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveProfile {
    pub downlink_mbps: f64,
    pub rtt_ms: u64,
    pub chunk_bytes: usize,
    pub concurrency: usize,
}

impl AdaptiveProfile {
    pub fn derive(sample: &NetworkSample, file_size: u64) -> Self {
        let (mut chunk_bytes, mut concurrency) =
            if sample.downlink_mbps < 1.0 || sample.rtt_ms >= 1000 {
                (MIN_CHUNK_BYTES, 1)
            } else if sample.downlink_mbps < 5.0 {
                (MIB, 2)
            } else if sample.downlink_mbps < 10.0 {
                (5 * MIB, 4)
            } else {
                (MAX_CHUNK_BYTES, MAX_CONCURRENCY)
            };

        if sample.save_data {
            chunk_bytes = chunk_bytes.min(SAVE_DATA_CHUNK_BYTES);
            concurrency = concurrency.min(SAVE_DATA_CONCURRENCY);
        }

        // Never slice larger than the file itself
        let file_size = usize::try_from(file_size).unwrap_or(usize::MAX).max(1);
        chunk_bytes = chunk_bytes.min(file_size);

        Self {
            downlink_mbps: sample.downlink_mbps,
            rtt_ms: sample.rtt_ms,
            chunk_bytes,
            concurrency,
        }
    }
}

/// Read side of a [`NetworkMonitor`]; recomputes the profile on every read
#[derive(Debug, Clone)]
pub struct AdaptiveController {
    rx: watch::Receiver<NetworkSample>,
    max_chunk_bytes: Option<usize>,
}

impl AdaptiveController {
    /// Cap chunk size, e.g. at the receiver's request body limit
    pub fn with_max_chunk_bytes(mut self, max: usize) -> Self {
        self.max_chunk_bytes = Some(max.max(1));
        self
    }

    pub fn sample(&self) -> NetworkSample {
        *self.rx.borrow()
    }

    pub fn profile(&self, file_size: u64) -> AdaptiveProfile {
        let mut profile = AdaptiveProfile::derive(&self.sample(), file_size);
        if let Some(max) = self.max_chunk_bytes {
            profile.chunk_bytes = profile.chunk_bytes.min(max);
        }
        profile
    }

    pub fn is_online(&self) -> bool {
        self.rx.borrow().online
    }

    /// Park until the monitor reports the network back online
    pub async fn wait_online(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        let mut rx = self.rx.clone();
        loop {
            if rx.borrow_and_update().online {
                return Ok(());
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(ClientError::NetworkUnavailable("network monitor closed".to_string()));
                    }
                }
                _ = cancel.cancelled() => return Err(ClientError::Canceled),
            }
        }
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Exponential backoff seeded from the observed round trip
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts per chunk, including the first
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Fractional jitter applied either way, 0.3 = ±30%; clamped to `[0, 1]`
    pub jitter: f64,
    pub rtt_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: 0.3,
            rtt_multiplier: 4,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the `attempt`-th failure (1-based)
    pub fn delay(&self, attempt: u32, rtt_ms: u64) -> Duration {
        let unit: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_with_jitter(attempt, rtt_ms, unit)
    }

    /// Same as [`RetryPolicy::delay`] with the jitter draw supplied, `unit` in `[-1, 1]`
    pub fn delay_with_jitter(&self, attempt: u32, rtt_ms: u64, unit: f64) -> Duration {
        let base = Duration::from_millis(rtt_ms.saturating_mul(self.rtt_multiplier as u64))
            .max(self.min_delay);
        let exp = 2f64.powi(attempt.saturating_sub(1).min(16) as i32);
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let factor = 1.0 + jitter * unit.clamp(-1.0, 1.0);

        let secs = base.as_secs_f64() * exp * factor;
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.min_delay)
            .clamp(self.min_delay, self.max_delay)
    }
}
