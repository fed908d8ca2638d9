//! Resumable Chunked Upload Module
//!
//! Accepts a video as independently submitted chunks:
//! - Out-of-order arrival; each index is recorded at most once
//! - Optional per-chunk SHA-256 digest check before a chunk is stored
//! - Reassembly in index order once the bitmap is full
//! - Single commit of the reassembled payload to the object store
//!
//! Protocol Flow:
//! 1. Client initializes a session with the chunk count it will send
//! 2. Client uploads chunks, in any order and possibly concurrently
//! 3. The chunk that fills the bitmap triggers reassembly and commit
//! 4. Duplicate completing chunks receive the committed reference

pub mod chunk_store;
pub mod committer;
pub mod session;
pub mod side_cache;
pub mod types;

pub use chunk_store::{compute_hash, verify_hash, ChunkStore};
pub use committer::Committer;
pub use session::{parse_session_id, SessionTracker, TrackerSettings};
pub use side_cache::{MemorySideCache, SideCache, SqliteSideCache};
pub use types::*;
