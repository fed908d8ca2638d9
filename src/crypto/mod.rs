//! Encryption Engine
//!
//! AES-256-GCM for new content with read-only support for content recorded
//! as legacy AES-256-CBC, plus a background worker that keeps whole-payload
//! crypto off the async runtime.

pub mod cipher;
pub mod worker;

pub use cipher::{
    decrypt, encrypt, encrypt_legacy, CipherMode, ContentKey, CryptoError, EncryptedPayload,
};
pub use worker::CryptoWorker;
