//! Announce authentication for lanmesh.
//!
//! Every datagram carries an HMAC-SHA256 tag over the encoded payload, keyed
//! with a secret shared out-of-band by all participants. Forging a tag needs
//! the secret; there is no confidentiality, only authenticity.
//!
//! Key material lives in a [`SharedSecret`], which is wiped from memory when
//! dropped. There is no unsafe code in this module.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::wire::SIGNATURE_LEN;

type HmacSha256 = Hmac<Sha256>;

/// Value shipped in the sample config. Never accepted as a real secret.
pub const PLACEHOLDER_SECRET: &str = "CHANGE_ME";

// ── Shared Secret ─────────────────────────────────────────────────────────────

/// HMAC key derived from the operator-supplied secret string.
///
/// Key policy, identical on the announce and verify sides:
///   * a non-empty string of valid hex is decoded to raw key bytes
///   * anything else is used as raw UTF-8 bytes
#[derive(Clone)]
pub struct SharedSecret {
    key: Zeroizing<Vec<u8>>,
}

impl SharedSecret {
    /// Derive the key from a configured secret string.
    pub fn from_config(secret: &str) -> Result<Self, SecretError> {
        if secret.is_empty() {
            return Err(SecretError::Missing);
        }
        if secret == PLACEHOLDER_SECRET {
            return Err(SecretError::Placeholder);
        }

        let key = match hex::decode(secret) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            _ => secret.as_bytes().to_vec(),
        };
        Ok(Self {
            key: Zeroizing::new(key),
        })
    }

    #[cfg(test)]
    fn key_bytes(&self) -> &[u8] {
        &self.key
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length; new_from_slice cannot fail here.
        match HmacSha256::new_from_slice(&self.key) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC accepts keys of any length"),
        }
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("key", &"<redacted>")
            .field("len", &self.key.len())
            .finish()
    }
}

// ── Sign / Verify ─────────────────────────────────────────────────────────────

/// Compute the 32-byte tag for `data`.
pub fn sign(data: &[u8], secret: &SharedSecret) -> [u8; SIGNATURE_LEN] {
    let mut mac = secret.mac();
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Check a tag in constant time with respect to its bytes.
///
/// A truncated or over-long `signature` is rejected.
pub fn verify(signature: &[u8], data: &[u8], secret: &SharedSecret) -> bool {
    let mut mac = secret.mac();
    mac.update(data);
    mac.verify_slice(signature).is_ok()
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    #[error("shared_secret must be set")]
    Missing,
    #[error("shared_secret must be changed from '{}'", PLACEHOLDER_SECRET)]
    Placeholder,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
