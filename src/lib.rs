//! ReelSafe
//!
//! Resumable, integrity-checked, optionally encrypted chunked video upload,
//! plus client-side decryption for playback.
//!
//! # Modules
//!
//! - `upload`: Session tracker, chunk store, reassembly and commit
//! - `routes`: HTTP surface for upload sessions and playback grants
//! - `crypto`: AES-256-GCM engine with read-only legacy CBC support and a worker thread
//! - `client`: Adaptive chunked uploader and decrypting playback client
//! - `storage`: Object store seam (S3 and in-memory)
//! - `catalog`: Entitlement and key-material lookups

pub mod auth;
pub mod catalog;
pub mod client;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;
