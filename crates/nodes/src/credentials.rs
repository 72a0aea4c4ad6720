//! Credential Store: AES-256-GCM encryption of third-party secrets at rest.
//!
//! Stored form: `base64(nonce ‖ ciphertext)` with a fresh 12-byte nonce per
//! encryption.

use aes_gcm::aead::{rand_core::RngCore, Aead, OsRng};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::{engine::general_purpose, Engine as _};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CredentialError {
    #[error("encryption key must be {KEY_LEN} bytes (raw or base64), got {0}")]
    InvalidKey(usize),

    #[error("encryption failed")]
    Encrypt,

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("decryption failed: wrong key or tampered data")]
    Decrypt,
}

/// Encrypts, decrypts and masks credentials with one organization-wide key.
#[derive(Clone)]
pub struct CredentialStore {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialStore { .. }")
    }
}

impl CredentialStore {
    /// Build from a key given as exactly 32 raw bytes or as base64 of 32 bytes.
    pub fn new(key: &str) -> Result<Self, CredentialError> {
        let bytes = if key.len() == KEY_LEN {
            key.as_bytes().to_vec()
        } else {
            general_purpose::STANDARD
                .decode(key.trim())
                .map_err(|_| CredentialError::InvalidKey(key.len()))?
        };
        if bytes.len() != KEY_LEN {
            return Err(CredentialError::InvalidKey(bytes.len()));
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&bytes));
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CredentialError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CredentialError::Encrypt)?;

        let mut stored = nonce_bytes.to_vec();
        stored.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(stored))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, CredentialError> {
        let bytes = general_purpose::STANDARD
            .decode(stored.trim())
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;
        if bytes.len() <= NONCE_LEN {
            return Err(CredentialError::Malformed("shorter than nonce".into()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CredentialError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|e| CredentialError::Malformed(e.to_string()))
    }
}

/// Display form of a secret: the last four characters behind a fixed mask.
/// Secrets of eight characters or fewer are fully masked.
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "••••••••".to_owned();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("••••••••{tail}")
}
