//! Chunk Integrity Verifier
//!
//! Digests are taken over the exact bytes that go on the wire. Every check is
//! recorded per chunk index so a finished job can be audited afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// Pluggable collision-resistant hash
pub trait ChunkHasher: Send + Sync {
    /// Hex digest of `data`
    fn digest(&self, data: &[u8]) -> String;

    fn algorithm(&self) -> &'static str;
}

/// Default 256-bit hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ChunkHasher for Sha256Hasher {
    fn digest(&self, data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    fn algorithm(&self) -> &'static str {
        "sha256"
    }
}

/// One verification outcome for a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRecord {
    pub expected: String,
    pub actual: String,
    pub ok: bool,
}

pub struct ChunkVerifier {
    hasher: Arc<dyn ChunkHasher>,
    audit: Mutex<BTreeMap<usize, Vec<VerificationRecord>>>,
}

impl Default for ChunkVerifier {
    fn default() -> Self {
        Self::new(Arc::new(Sha256Hasher))
    }
}

impl ChunkVerifier {
    pub fn new(hasher: Arc<dyn ChunkHasher>) -> Self {
        Self {
            hasher,
            audit: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn compute(&self, chunk: &[u8]) -> String {
        self.hasher.digest(chunk)
    }

    /// Check `chunk` against `expected` and record the result under `index`
    pub fn verify(&self, index: usize, chunk: &[u8], expected: &str) -> bool {
        let actual = self.compute(chunk);
        let ok = actual.eq_ignore_ascii_case(expected);
        self.record(index, expected, actual, ok);
        ok
    }

    /// Record an outcome decided elsewhere, e.g. a receiver-side digest rejection
    pub fn record(&self, index: usize, expected: &str, actual: String, ok: bool) {
        self.audit
            .lock()
            .entry(index)
            .or_default()
            .push(VerificationRecord {
                expected: expected.to_string(),
                actual,
                ok,
            });
    }

    /// Every outcome recorded for `index`, oldest first
    pub fn history(&self, index: usize) -> Vec<VerificationRecord> {
        self.audit.lock().get(&index).cloned().unwrap_or_default()
    }

    /// Number of failed checks across all chunks
    pub fn failures(&self) -> usize {
        self.audit
            .lock()
            .values()
            .flat_map(|records| records.iter())
            .filter(|r| !r.ok)
            .count()
    }

    pub fn algorithm(&self) -> &'static str {
        self.hasher.algorithm()
    }
}
