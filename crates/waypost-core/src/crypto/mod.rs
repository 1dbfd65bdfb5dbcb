//! Cryptographic primitives for Waypost.
//!
//! This module provides:
//! - Random salt generation for end-to-end encrypted sessions
//! - PBKDF2-HMAC-SHA256 key derivation from a user passphrase
//! - Base64 transport encoding for salts
//!
//! ## Security Model
//!
//! End-to-end encryption is opt-in. When enabled, the client generates a
//! random salt at session initiation, sends it to the server alongside the
//! session request (the server relays it to viewers, never the passphrase),
//! and derives the symmetric key locally from the passphrase and salt. The
//! passphrase itself never leaves the device.

use serde::{Deserialize, Serialize};

use crate::{E2E_KEY_BITS, PBKDF2_ITERATIONS};

/// Key-derivation parameters for an end-to-end encrypted session.
///
/// Holds everything needed to re-derive the session key: the user's
/// passphrase and the random salt generated at session initiation. Both are
/// persisted with the session snapshot so a resumed session can continue
/// encrypting with the same key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    /// User-supplied passphrase
    passphrase: String,
    /// Random salt, `E2E_KEY_BITS / 8` bytes
    #[serde(with = "base64_bytes")]
    salt: Vec<u8>,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("passphrase", &"<redacted>")
            .field("salt_len", &self.salt.len())
            .finish()
    }
}

impl KeyMaterial {
    /// Create key material from a passphrase and a previously generated salt.
    #[must_use]
    pub fn new(passphrase: impl Into<String>, salt: Vec<u8>) -> Self {
        Self {
            passphrase: passphrase.into(),
            salt,
        }
    }

    /// The salt bytes.
    #[must_use]
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Derive the symmetric key from the passphrase and salt.
    #[must_use]
    pub fn derive_key(&self) -> Vec<u8> {
        pbkdf2_sha256(
            self.passphrase.as_bytes(),
            &self.salt,
            PBKDF2_ITERATIONS,
            E2E_KEY_BITS / 8,
        )
    }
}

/// Generate a random salt sized to the configured key length.
#[must_use]
pub fn generate_salt() -> Vec<u8> {
    use rand::RngCore;

    let mut bytes = vec![0u8; E2E_KEY_BITS / 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Derive `key_len` bytes from a password and salt using PBKDF2-HMAC-SHA256.
#[must_use]
pub fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32, key_len: usize) -> Vec<u8> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let prf = HmacSha256::new_from_slice(password).expect("HMAC can take key of any size");

    let mut out = Vec::with_capacity(key_len);
    let mut block_index: u32 = 1;
    while out.len() < key_len {
        let mut mac = prf.clone();
        mac.update(salt);
        mac.update(&block_index.to_be_bytes());
        let mut u = mac.finalize().into_bytes().to_vec();
        let mut block = u.clone();
        for _ in 1..iterations {
            let mut mac = prf.clone();
            mac.update(&u);
            u = mac.finalize().into_bytes().to_vec();
            for (b, x) in block.iter_mut().zip(&u) {
                *b ^= x;
            }
        }
        out.extend_from_slice(&block);
        block_index += 1;
    }
    out.truncate(key_len);
    out
}

/// Encode a salt for transport in a request field.
#[must_use]
pub fn encode_salt(salt: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    STANDARD.encode(salt)
}

/// Serde adapter storing byte vectors as base64 strings.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_salt_length_matches_key_size() {
        let salt = generate_salt();
        assert_eq!(salt.len(), E2E_KEY_BITS / 8);
    }

    #[test]
    fn test_salts_are_random() {
        assert_ne!(generate_salt(), generate_salt());
    }

    #[test]
    fn test_pbkdf2_known_vector() {
        // RFC 7914 appendix B test vector for PBKDF2-HMAC-SHA256.
        let key = pbkdf2_sha256(b"passwd", b"salt", 1, 32);
        assert_eq!(
            key[..8],
            [0x55, 0xac, 0x04, 0x6e, 0x56, 0xe3, 0x08, 0x9f]
        );
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        let material = KeyMaterial::new("hunter2", vec![7u8; E2E_KEY_BITS / 8]);
        assert_eq!(material.derive_key(), material.derive_key());
        assert_eq!(material.derive_key().len(), E2E_KEY_BITS / 8);
    }

    #[test]
    fn test_key_material_round_trips_through_json() {
        let material = KeyMaterial::new("hunter2", generate_salt());
        let json = serde_json::to_string(&material).unwrap();
        let back: KeyMaterial = serde_json::from_str(&json).unwrap();
        assert_eq!(material, back);
    }
}
