//! Keccak-256 digests over canonical payload bytes.
//!
//! Uses the pre-NIST Keccak permutation, not SHA3-256: the padding
//! differs and the digests are incompatible. The hex rendering with the
//! `0x` prefix is the proof's public identifier.

use sha3::{Digest, Keccak256};

use crate::error::{AttestationError, Result};

/// Length of the hex rendering: `0x` + 64 nibbles.
pub const DIGEST_HEX_LEN: usize = 66;

/// Keccak-256 over arbitrary bytes.
pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Keccak-256 rendered as `0x` + 64 lowercase hex characters.
pub fn keccak256_hex(bytes: &[u8]) -> String {
    to_hex(&keccak256(bytes))
}

/// Renders a raw digest in the public hex form.
pub fn to_hex(digest: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(digest))
}

/// Parses the public hex form back into a raw digest.
///
/// # Errors
///
/// Returns `AttestationError::MalformedDigest` unless the input is
/// exactly `0x` + 64 hex characters.
pub fn from_hex(s: &str) -> Result<[u8; 32]> {
    let malformed = || AttestationError::MalformedDigest {
        digest: s.chars().take(DIGEST_HEX_LEN + 4).collect(),
    };

    let hex_part = s.strip_prefix("0x").ok_or_else(malformed)?;
    if hex_part.len() != 64 {
        return Err(malformed());
    }

    let bytes = hex::decode(hex_part).map_err(|_| malformed())?;
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&bytes);
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_of_empty_input_matches_known_vector() {
        // Keccak-256(""), distinct from SHA3-256("").
        assert_eq!(
            keccak256_hex(b""),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn keccak_of_ascii_matches_known_vector() {
        assert_eq!(
            keccak256_hex(b"abc"),
            "0x4e03657aea45a94fc7d47ba826c8d667c0d1e6e33a64a036ec44f58fa12d6c45"
        );
    }

    #[test]
    fn hex_rendering_round_trips() {
        let digest = keccak256(b"round trip");
        let rendered = to_hex(&digest);

        assert_eq!(rendered.len(), DIGEST_HEX_LEN);
        assert!(rendered.starts_with("0x"));
        assert_eq!(rendered, rendered.to_lowercase());
        assert_eq!(from_hex(&rendered).unwrap(), digest);
    }

    #[test]
    fn malformed_hex_is_rejected() {
        assert!(from_hex("").is_err());
        assert!(from_hex("c5d246").is_err());
        assert!(from_hex("0xdeadbeef").is_err());
        assert!(from_hex(&format!("0x{}", "g".repeat(64))).is_err());
        assert!(from_hex(&format!("0x{}", "a".repeat(63))).is_err());
    }
}
