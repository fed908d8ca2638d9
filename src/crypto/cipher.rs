//! Video payload encryption
//!
//! Primary mode is AES-256-GCM with a random 12-byte nonce:
//!
//! ```text
//! IV(12) || ciphertext || tag(16)
//! ```
//!
//! Content encrypted before the switch to AEAD uses AES-256-CBC with PKCS#7
//! padding and a 16-byte IV:
//!
//! ```text
//! IV(16) || ciphertext
//! ```
//!
//! The two IV lengths are never mixed. Every encrypted content id records its
//! [`CipherMode`] next to its key, and decryption dispatches on that mode.
//! Only content flagged [`CipherMode::LegacyCbc`] ever reaches the CBC path,
//! so a tampered AEAD payload fails authentication instead of being re-read
//! under the unauthenticated legacy mode.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;

type LegacyEncryptor = cbc::Encryptor<aes::Aes256>;
type LegacyDecryptor = cbc::Decryptor<aes::Aes256>;

pub const KEY_LEN: usize = 32;
pub const GCM_IV_LEN: usize = 12;
pub const GCM_TAG_LEN: usize = 16;
pub const CBC_IV_LEN: usize = 16;
const CBC_BLOCK_LEN: usize = 16;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Key must be {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Encrypted payload is missing its IV")]
    MissingIv,

    #[error("Content could not be decrypted with either cipher mode")]
    Undecryptable,

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Crypto worker is not running")]
    WorkerUnavailable,

    #[error("Crypto worker replied to request {actual}, expected {expected}")]
    CorrelationMismatch { expected: u64, actual: u64 },
}

impl CryptoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKeyLength(_) => ErrorKind::InvalidArgument,
            Self::Undecryptable => ErrorKind::UndecryptableContent,
            _ => ErrorKind::Internal,
        }
    }
}

// ============================================================================
// Keys
// ============================================================================

/// 256-bit symmetric content key
#[derive(Clone, PartialEq, Eq)]
pub struct ContentKey([u8; KEY_LEN]);

impl ContentKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Fresh random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

// ============================================================================
// Wire Format
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherMode {
    /// AES-256-GCM, 12-byte IV, 16-byte tag
    #[serde(rename = "aes-256-gcm")]
    Aead,
    /// AES-256-CBC/PKCS#7, 16-byte IV; decrypt only in production paths
    #[serde(rename = "aes-256-cbc")]
    LegacyCbc,
}

impl CipherMode {
    pub fn iv_len(self) -> usize {
        match self {
            Self::Aead => GCM_IV_LEN,
            Self::LegacyCbc => CBC_IV_LEN,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aead => "aes-256-gcm",
            Self::LegacyCbc => "aes-256-cbc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-256-gcm" => Some(Self::Aead),
            "aes-256-cbc" => Some(Self::LegacyCbc),
            _ => None,
        }
    }
}

/// Encrypted payload split into its wire parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub mode: CipherMode,
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
    /// Authentication tag; `None` under the legacy mode
    pub tag: Option<[u8; GCM_TAG_LEN]>,
}

impl EncryptedPayload {
    /// Reject a payload whose IV is absent or of the wrong width for its mode
    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.iv.len() != self.mode.iv_len() {
            return Err(CryptoError::MissingIv);
        }
        if self.mode == CipherMode::Aead && self.tag.is_none() {
            return Err(CryptoError::Undecryptable);
        }
        Ok(())
    }

    /// Serialize to the wire format of its mode
    pub fn to_bytes(&self) -> Vec<u8> {
        let tag_len = self.tag.map_or(0, |t| t.len());
        let mut out = Vec::with_capacity(self.iv.len() + self.ciphertext.len() + tag_len);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        if let Some(tag) = &self.tag {
            out.extend_from_slice(tag);
        }
        out
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Encrypt under the primary AEAD mode with a fresh random IV
pub fn encrypt(plaintext: &[u8], key: &ContentKey) -> Result<EncryptedPayload, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::InvalidKeyLength(KEY_LEN))?;

    let mut iv = [0u8; GCM_IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::EncryptFailed)?;

    // aes-gcm appends the tag to the ciphertext
    let tag_start = sealed.len() - GCM_TAG_LEN;
    let mut tag = [0u8; GCM_TAG_LEN];
    tag.copy_from_slice(&sealed[tag_start..]);
    sealed.truncate(tag_start);

    let payload = EncryptedPayload {
        mode: CipherMode::Aead,
        iv: iv.to_vec(),
        ciphertext: sealed,
        tag: Some(tag),
    };
    payload.validate()?;
    Ok(payload)
}

/// Encrypt under the legacy CBC mode, for migrations and compatibility tests
pub fn encrypt_legacy(plaintext: &[u8], key: &ContentKey) -> Result<EncryptedPayload, CryptoError> {
    let mut iv = [0u8; CBC_IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = LegacyEncryptor::new_from_slices(key.as_bytes(), &iv)
        .map_err(|_| CryptoError::InvalidKeyLength(KEY_LEN))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    Ok(EncryptedPayload {
        mode: CipherMode::LegacyCbc,
        iv: iv.to_vec(),
        ciphertext,
        tag: None,
    })
}

/// Decrypt wire bytes under the mode recorded for the content
pub fn decrypt(data: &[u8], key: &ContentKey, mode: CipherMode) -> Result<Vec<u8>, CryptoError> {
    match mode {
        CipherMode::Aead => {
            if data.len() < GCM_IV_LEN + GCM_TAG_LEN {
                return Err(CryptoError::Undecryptable);
            }
            let (iv, sealed) = data.split_at(GCM_IV_LEN);
            let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|_| CryptoError::InvalidKeyLength(KEY_LEN))?;
            cipher
                .decrypt(Nonce::from_slice(iv), sealed)
                .map_err(|_| CryptoError::Undecryptable)
        }
        CipherMode::LegacyCbc => {
            // IV plus at least one full block; CBC output is always block aligned
            if data.len() < CBC_IV_LEN + CBC_BLOCK_LEN
                || (data.len() - CBC_IV_LEN) % CBC_BLOCK_LEN != 0
            {
                return Err(CryptoError::Undecryptable);
            }
            let (iv, ciphertext) = data.split_at(CBC_IV_LEN);
            let plaintext = LegacyDecryptor::new_from_slices(key.as_bytes(), iv)
                .map_err(|_| CryptoError::InvalidKeyLength(KEY_LEN))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(|_| CryptoError::Undecryptable)?;
            tracing::debug!(bytes = data.len(), "Decrypted content with legacy cipher mode");
            Ok(plaintext)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ContentKey {
        ContentKey::new([0x42; KEY_LEN])
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_aead_roundtrip_sizes() {
        let key = key();
        for len in [0usize, 1, 15, 16, 17, 4096, 1024 * 1024 + 3] {
            let plaintext = pattern(len);
            let payload = encrypt(&plaintext, &key).unwrap();

            // Stream-like: ciphertext length equals plaintext length
            assert_eq!(payload.ciphertext.len(), len);
            let wire = payload.to_bytes();
            assert_eq!(wire.len(), GCM_IV_LEN + len + GCM_TAG_LEN);

            assert_eq!(decrypt(&wire, &key, CipherMode::Aead).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_legacy_roundtrip_sizes() {
        let key = key();
        for len in [0usize, 1, 15, 16, 17, 31, 32, 33, 4096] {
            let plaintext = pattern(len);
            let payload = encrypt_legacy(&plaintext, &key).unwrap();

            // PKCS#7 always adds a block when the input is already aligned
            assert_eq!(payload.ciphertext.len(), (len / 16 + 1) * 16);
            let decrypted = decrypt(&payload.to_bytes(), &key, CipherMode::LegacyCbc).unwrap();
            assert_eq!(decrypted, plaintext, "{} bytes", len);
        }
    }

    #[test]
    #[ignore = "encrypts 128 MiB per mode"]
    fn test_large_roundtrip_both_modes() {
        let key = key();
        let plaintext = pattern(128 * 1024 * 1024 + 5);

        let wire = encrypt(&plaintext, &key).unwrap().to_bytes();
        assert!(decrypt(&wire, &key, CipherMode::Aead).unwrap() == plaintext);

        let wire = encrypt_legacy(&plaintext, &key).unwrap().to_bytes();
        assert!(decrypt(&wire, &key, CipherMode::LegacyCbc).unwrap() == plaintext);
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let key = key();
        let a = encrypt(b"same", &key).unwrap();
        let b = encrypt(b"same", &key).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn test_any_bit_flip_fails_authentication() {
        // Lengths with len % 16 == 4 leave the wire block aligned after a
        // 16-byte IV, the shape a CBC reinterpretation would accept
        for len in [0usize, 1, 4, 15, 16, 20, 36, 52, 101] {
            for seed in 0..8u8 {
                let key = ContentKey::new([seed; KEY_LEN]);
                let wire = encrypt(&pattern(len), &key).unwrap().to_bytes();

                for byte in 0..wire.len() {
                    for bit in 0..8 {
                        let mut tampered = wire.clone();
                        tampered[byte] ^= 1 << bit;
                        assert_eq!(
                            decrypt(&tampered, &key, CipherMode::Aead),
                            Err(CryptoError::Undecryptable),
                            "len {} byte {} bit {}",
                            len,
                            byte,
                            bit
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_modes_are_not_interchangeable() {
        let key = key();
        let aead = encrypt(&pattern(20), &key).unwrap().to_bytes();
        let legacy = encrypt_legacy(&pattern(20), &key).unwrap().to_bytes();

        assert_eq!(decrypt(&legacy, &key, CipherMode::Aead), Err(CryptoError::Undecryptable));
        assert_ne!(decrypt(&aead, &key, CipherMode::LegacyCbc), Ok(pattern(20)));
    }

    #[test]
    fn test_wrong_key_is_undecryptable() {
        let wire = encrypt(b"lecture", &key()).unwrap().to_bytes();
        let other = ContentKey::new([0x01; KEY_LEN]);
        assert_eq!(decrypt(&wire, &other, CipherMode::Aead), Err(CryptoError::Undecryptable));
    }

    #[test]
    fn test_mode_names() {
        for mode in [CipherMode::Aead, CipherMode::LegacyCbc] {
            assert_eq!(CipherMode::parse(mode.as_str()), Some(mode));
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.as_str()));
        }
        assert_eq!(CipherMode::parse("rot13"), None);
    }

    #[test]
    fn test_validate_rejects_missing_iv() {
        let mut payload = encrypt(b"x", &key()).unwrap();
        payload.iv.clear();
        assert_eq!(payload.validate(), Err(CryptoError::MissingIv));

        // A legacy-width IV is not acceptable for the AEAD mode
        payload.iv = vec![0u8; CBC_IV_LEN];
        assert_eq!(payload.validate(), Err(CryptoError::MissingIv));
    }

    #[test]
    fn test_key_length_checked() {
        assert_eq!(
            ContentKey::from_slice(&[0u8; 16]),
            Err(CryptoError::InvalidKeyLength(16))
        );
        assert!(ContentKey::from_slice(&[0u8; 32]).is_ok());
        assert_eq!(format!("{:?}", key()), "ContentKey(..)");
    }
}
