//! Cipher contract for ticket ids and payloads.
//!
//! The registry applies the cipher uniformly at its boundary so no backend
//! ever sees a raw ticket id or an unencrypted payload when encryption is on.
//!
//! - [`NoOpCipher`]: identity, the default
//! - [`AesGcmCipher`]: AES-256-GCM payloads and SHA-512 digested ids
//!
//! # Security
//!
//! Ids are digested rather than encrypted so the storage key stays
//! deterministic (the same id always maps to the same key) while revealing
//! nothing about the ticket. Payloads use a fresh random nonce per call, so
//! encrypting the same ticket twice yields different bytes.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha512};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// AES-256 key length in bytes.
pub const KEY_LENGTH: usize = 32;

/// AES-GCM nonce length in bytes.
const NONCE_LENGTH: usize = 12;

/// Errors from encoding or decoding payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// The key is unusable.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// The payload is malformed or failed authentication.
    #[error("Decryption failed: {0}")]
    Decryption(String),
}

/// Encode/decode strategy applied to ticket ids and serialized tickets.
///
/// Implementations must satisfy `decode(encode(p)) == p` for every payload
/// and must map equal ids to equal keys.
pub trait CipherExecutor: Send + Sync + fmt::Debug {
    /// Map a ticket id to its storage key.
    fn encode_id(&self, ticket_id: &str) -> String;

    /// Protect a serialized ticket.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Encryption`] if the payload cannot be encoded.
    fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Recover a serialized ticket.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Decryption`] if the payload is malformed or was
    /// tampered with.
    fn decode(&self, payload: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Whether this cipher changes anything.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Identity cipher: ids and payloads pass through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCipher;

impl CipherExecutor for NoOpCipher {
    fn encode_id(&self, ticket_id: &str) -> String {
        ticket_id.to_string()
    }

    fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, CipherError> {
        Ok(payload.to_vec())
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<u8>, CipherError> {
        Ok(payload.to_vec())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// AES-256-GCM payload encryption with SHA-512 id digests.
///
/// Stored payload layout: `[nonce (12 bytes)][ciphertext + tag]`.
///
/// # Examples
///
/// ```
/// use ticket_registry_core::{AesGcmCipher, CipherExecutor};
///
/// let cipher = AesGcmCipher::new(&AesGcmCipher::generate_key()).unwrap();
/// let encrypted = cipher.encode(b"ticket").unwrap();
/// assert_ne!(encrypted, b"ticket");
/// assert_eq!(cipher.decode(&encrypted).unwrap(), b"ticket");
/// assert_eq!(cipher.encode_id("ST-1"), cipher.encode_id("ST-1"));
/// ```
#[derive(Clone)]
pub struct AesGcmCipher {
    /// Wrapped in Arc so clones share one key schedule.
    cipher: Arc<Aes256Gcm>,
}

impl AesGcmCipher {
    /// Create a cipher from a 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKey`] unless the key is exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != KEY_LENGTH {
            return Err(CipherError::InvalidKey(format!(
                "expected {KEY_LENGTH} bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        Ok(Self {
            cipher: Arc::new(cipher),
        })
    }

    /// Create a cipher from a base64 (standard or URL-safe) encoded key.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKey`] if the text is not base64 or does
    /// not decode to 32 bytes.
    pub fn from_base64(encoded_key: &str) -> Result<Self, CipherError> {
        let trimmed = encoded_key.trim().trim_end_matches('=');
        let key = URL_SAFE_NO_PAD
            .decode(trimmed.replace('+', "-").replace('/', "_"))
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        Self::new(&key)
    }

    /// Generate a random key from the OS CSPRNG.
    #[must_use]
    pub fn generate_key() -> Vec<u8> {
        Aes256Gcm::generate_key(&mut OsRng).to_vec()
    }
}

impl fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl CipherExecutor for AesGcmCipher {
    fn encode_id(&self, ticket_id: &str) -> String {
        if ticket_id.is_empty() {
            return String::new();
        }
        URL_SAFE_NO_PAD.encode(Sha512::digest(ticket_id.as_bytes()))
    }

    fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, payload)
            .map_err(|e| CipherError::Encryption(e.to_string()))?;

        let mut encrypted = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        encrypted.extend_from_slice(&nonce);
        encrypted.extend_from_slice(&ciphertext);
        Ok(encrypted)
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<u8>, CipherError> {
        if payload.len() < NONCE_LENGTH {
            return Err(CipherError::Decryption(
                "payload shorter than nonce".to_string(),
            ));
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LENGTH);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CipherError::Decryption(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;
    use proptest::prelude::*;

    fn cipher() -> AesGcmCipher {
        AesGcmCipher::new(&[7u8; KEY_LENGTH]).unwrap()
    }

    #[test]
    fn rejects_short_keys() {
        let result = AesGcmCipher::new(&[0u8; 16]);
        assert!(matches!(result, Err(CipherError::InvalidKey(_))));
    }

    #[test]
    fn accepts_base64_keys() {
        let key = URL_SAFE_NO_PAD.encode([3u8; KEY_LENGTH]);
        assert!(AesGcmCipher::from_base64(&key).is_ok());
        assert!(AesGcmCipher::from_base64("not base64!").is_err());
    }

    #[test]
    fn encrypting_twice_uses_fresh_nonces() {
        let cipher = cipher();
        let first = cipher.encode(b"same payload").unwrap();
        let second = cipher.encode(b"same payload").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let cipher = cipher();
        let mut encrypted = cipher.encode(b"payload").unwrap();
        if let Some(last) = encrypted.last_mut() {
            *last ^= 0x01;
        }
        assert!(matches!(
            cipher.decode(&encrypted),
            Err(CipherError::Decryption(_))
        ));
        assert!(cipher.decode(&[1, 2, 3]).is_err());
    }

    #[test]
    fn id_digest_is_deterministic_and_opaque() {
        let cipher = cipher();
        let key = cipher.encode_id("TGT-1-secret");
        assert_eq!(key, cipher.encode_id("TGT-1-secret"));
        assert_ne!(key, cipher.encode_id("TGT-2-secret"));
        assert!(!key.contains("secret"));
        // 64 digest bytes in unpadded base64
        assert_eq!(key.len(), 86);
        assert_eq!(cipher.encode_id(""), "");
    }

    #[test]
    fn no_op_cipher_is_identity() {
        let cipher = NoOpCipher;
        assert!(!cipher.is_enabled());
        assert_eq!(cipher.encode_id("ST-1"), "ST-1");
        assert_eq!(cipher.decode(&cipher.encode(b"abc").unwrap()).unwrap(), b"abc");
    }

    proptest! {
        #[test]
        fn aes_round_trips_arbitrary_payloads(
            payload in proptest::collection::vec(any::<u8>(), 0..512)
        ) {
            let cipher = cipher();
            let encrypted = cipher.encode(&payload).unwrap();
            prop_assert_eq!(cipher.decode(&encrypted).unwrap(), payload);
        }
    }
}
