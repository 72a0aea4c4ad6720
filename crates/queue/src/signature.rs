//! HMAC-SHA256 signatures on queue deliveries.
//!
//! The provider signs the raw request body with its current signing key and
//! sends the hex digest in [`SIGNATURE_HEADER`].  During key rotation a
//! message may be signed with the next key, so both are accepted.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::error::QueueError;

pub const SIGNATURE_HEADER: &str = "x-queue-signature";

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `body` under `key`.
pub fn sign(key: &str, body: &[u8]) -> Result<String, QueueError> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| QueueError::Signing(e.to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Outcome of [`SignatureVerifier::verify`]; `body` is the parsed JSON of a
/// valid message.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub is_valid: bool,
    pub body: Option<Value>,
}

impl Verification {
    fn invalid() -> Self {
        Self { is_valid: false, body: None }
    }
}

#[derive(Clone)]
pub struct SignatureVerifier {
    current_key: String,
    next_key: Option<String>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("next_key", &self.next_key.is_some())
            .finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(current_key: impl Into<String>, next_key: Option<String>) -> Self {
        Self {
            current_key: current_key.into(),
            next_key: next_key.filter(|k| !k.is_empty()),
        }
    }

    /// Check `signature` (hex, optionally prefixed `sha256=`) against the
    /// raw body under either key.  Comparison is constant-time.
    pub fn verify(&self, signature: &str, raw_body: &[u8]) -> Verification {
        let signature = signature.trim();
        let hex_digest = signature.strip_prefix("sha256=").unwrap_or(signature);
        let Ok(expected) = hex::decode(hex_digest) else {
            return Verification::invalid();
        };

        let matches = std::iter::once(self.current_key.as_str())
            .chain(self.next_key.as_deref())
            .filter(|key| !key.is_empty())
            .any(|key| match HmacSha256::new_from_slice(key.as_bytes()) {
                Ok(mut mac) => {
                    mac.update(raw_body);
                    mac.verify_slice(&expected).is_ok()
                }
                Err(_) => false,
            });

        if !matches {
            return Verification::invalid();
        }

        match serde_json::from_slice(raw_body) {
            Ok(body) => Verification { is_valid: true, body: Some(body) },
            Err(_) => Verification { is_valid: true, body: None },
        }
    }
}
