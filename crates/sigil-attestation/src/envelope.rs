//! AES-256-GCM envelope encryption for signatures at rest.
//!
//! Each signature is encrypted independently with a fresh random 96-bit
//! nonce and no additional data; there is no per-record key derivation.
//! The stored form is ASCII `hex(iv):hex(tag):hex(body)` with a 128-bit
//! tag. Any framing or authentication failure surfaces as the single
//! integrity error.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};

use crate::error::{AttestationError, Result};

/// GCM nonce length in bytes (96 bits).
const NONCE_LEN: usize = 12;

/// GCM authentication tag length in bytes (128 bits).
const TAG_LEN: usize = 16;

/// Envelope cipher holding the long-lived encryption key.
///
/// The key is loaded once at process start and read-only afterwards;
/// concurrent encryption needs no locking.
pub struct EnvelopeCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCipher").finish_non_exhaustive()
    }
}

impl EnvelopeCipher {
    /// Builds the cipher from a raw 32-byte key.
    pub fn from_bytes(key: &[u8; 32]) -> Self {
        Self { cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)) }
    }

    /// Loads the cipher from a hex-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns `AttestationError::InvalidKeyMaterial` on malformed hex
    /// or a wrong-length key.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let trimmed = hex_key.strip_prefix("0x").unwrap_or(hex_key);
        let bytes = hex::decode(trimmed)
            .map_err(|e| AttestationError::invalid_key_material(format!("bad hex: {e}")))?;

        let key: [u8; 32] = bytes.try_into().map_err(|_| {
            AttestationError::invalid_key_material("envelope key must be 32 bytes")
        })?;

        Ok(Self::from_bytes(&key))
    }

    /// Generates a cipher with a fresh random key.
    ///
    /// Suitable for tests and development; production keys come from
    /// configuration.
    pub fn ephemeral() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self::from_bytes(&key)
    }

    /// Encrypts a plaintext under a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns `AttestationError::Integrity` on cipher failure.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let mut iv = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut iv);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), Payload { msg: plaintext, aad: &[] })
            .map_err(|_| AttestationError::Integrity)?;

        // aes-gcm appends the tag to the ciphertext; the stored form
        // keeps it in its own segment.
        let (body, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!("{}:{}:{}", hex::encode(iv), hex::encode(tag), hex::encode(body)))
    }

    /// Decrypts the stored `hex(iv):hex(tag):hex(body)` form.
    ///
    /// # Errors
    ///
    /// Returns `AttestationError::Integrity` on malformed framing, wrong
    /// segment lengths, or tag verification failure.
    pub fn decrypt(&self, stored: &str) -> Result<Vec<u8>> {
        let mut segments = stored.split(':');
        let (Some(iv_hex), Some(tag_hex), Some(body_hex), None) =
            (segments.next(), segments.next(), segments.next(), segments.next())
        else {
            return Err(AttestationError::Integrity);
        };

        let iv = hex::decode(iv_hex).map_err(|_| AttestationError::Integrity)?;
        let tag = hex::decode(tag_hex).map_err(|_| AttestationError::Integrity)?;
        let body = hex::decode(body_hex).map_err(|_| AttestationError::Integrity)?;

        if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(AttestationError::Integrity);
        }

        let mut sealed = body;
        sealed.extend_from_slice(&tag);

        self.cipher
            .decrypt(Nonce::from_slice(&iv), Payload { msg: &sealed, aad: &[] })
            .map_err(|_| AttestationError::Integrity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_plaintext() {
        let cipher = EnvelopeCipher::ephemeral();

        for plaintext in [&b""[..], b"sig", b"0x0123abcd", &[0u8; 65]] {
            let stored = cipher.encrypt(plaintext).unwrap();
            assert_eq!(cipher.decrypt(&stored).unwrap(), plaintext);
        }
    }

    #[test]
    fn stored_form_has_three_hex_segments() {
        let cipher = EnvelopeCipher::ephemeral();
        let stored = cipher.encrypt(b"signature bytes").unwrap();

        let segments: Vec<&str> = stored.split(':').collect();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].len(), NONCE_LEN * 2);
        assert_eq!(segments[1].len(), TAG_LEN * 2);
        assert!(segments.iter().all(|s| s.chars().all(|c| c.is_ascii_hexdigit())));
    }

    #[test]
    fn nonces_are_fresh_per_encryption() {
        let cipher = EnvelopeCipher::ephemeral();

        let first = cipher.encrypt(b"same input").unwrap();
        let second = cipher.encrypt(b"same input").unwrap();

        assert_ne!(first, second);
        assert_ne!(
            first.split(':').next().unwrap(),
            second.split(':').next().unwrap(),
            "iv must differ between encryptions"
        );
    }

    #[test]
    fn tampering_any_byte_fails_with_integrity() {
        let cipher = EnvelopeCipher::ephemeral();
        let stored = cipher.encrypt(b"authenticated signature").unwrap();

        for i in 0..stored.len() {
            let mut tampered: Vec<char> = stored.chars().collect();
            let original = tampered[i];
            tampered[i] = if original == '0' { '1' } else { '0' };
            if tampered[i] == original {
                continue;
            }
            let tampered: String = tampered.into_iter().collect();

            assert!(
                cipher.decrypt(&tampered).is_err(),
                "tampering byte {i} must fail decryption"
            );
        }
    }

    #[test]
    fn malformed_framing_is_an_integrity_violation() {
        let cipher = EnvelopeCipher::ephemeral();

        for bad in [
            "",
            "deadbeef",
            "aa:bb",
            "aa:bb:cc:dd",
            "zz:bb:cc",
            "aabb:ccdd:eeff", // iv too short
        ] {
            assert!(matches!(cipher.decrypt(bad), Err(AttestationError::Integrity)));
        }

        // Correct framing but truncated tag segment.
        let stored = cipher.encrypt(b"x").unwrap();
        let mut parts: Vec<String> = stored.split(':').map(String::from).collect();
        parts[1].truncate(30);
        assert!(cipher.decrypt(&parts.join(":")).is_err());
    }

    #[test]
    fn decryption_requires_the_same_key() {
        let cipher = EnvelopeCipher::ephemeral();
        let other = EnvelopeCipher::ephemeral();

        let stored = cipher.encrypt(b"keyed").unwrap();
        assert!(other.decrypt(&stored).is_err());
    }

    #[test]
    fn key_loading_validates_length_and_hex() {
        assert!(EnvelopeCipher::from_hex(&"ab".repeat(32)).is_ok());
        assert!(EnvelopeCipher::from_hex(&format!("0x{}", "ab".repeat(32))).is_ok());
        assert!(EnvelopeCipher::from_hex("too short").is_err());
        assert!(EnvelopeCipher::from_hex(&"ab".repeat(16)).is_err());
    }
}
