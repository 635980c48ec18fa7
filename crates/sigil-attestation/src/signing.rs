//! secp256k1 ECDSA signing over payload digests.
//!
//! Signatures are exported in the 65-byte compact form `r ∥ s ∥ v` with
//! `v ∈ {27, 28}` encoding recovery parity, compatible with ledger-side
//! signer-recovery over the same Keccak-256 digest. `s` is always in the
//! lower half of the curve order.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{AttestationError, Result};

/// Length of the compact signature: 32-byte r, 32-byte s, 1-byte v.
pub const COMPACT_SIGNATURE_LEN: usize = 65;

/// 65-byte compact recoverable signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactSignature(pub [u8; COMPACT_SIGNATURE_LEN]);

impl CompactSignature {
    /// Assembles the compact form from signature parts.
    fn from_parts(signature: &Signature, recovery: RecoveryId) -> Self {
        let mut bytes = [0u8; COMPACT_SIGNATURE_LEN];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = 27 + recovery.to_byte();
        Self(bytes)
    }

    /// Recovery byte, always 27 or 28.
    pub const fn v(&self) -> u8 {
        self.0[64]
    }

    /// Renders the signature as `0x` + 130 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parses the hex rendering back into the compact form.
    ///
    /// # Errors
    ///
    /// Returns `AttestationError::SigningFailed` unless the input is
    /// `0x` + 130 hex characters with a valid recovery byte.
    pub fn from_hex(s: &str) -> Result<Self> {
        let hex_part = s.strip_prefix("0x").ok_or(AttestationError::SigningFailed)?;
        let bytes = hex::decode(hex_part).map_err(|_| AttestationError::SigningFailed)?;
        if bytes.len() != COMPACT_SIGNATURE_LEN {
            return Err(AttestationError::SigningFailed);
        }

        let mut compact = [0u8; COMPACT_SIGNATURE_LEN];
        compact.copy_from_slice(&bytes);
        if compact[64] != 27 && compact[64] != 28 {
            return Err(AttestationError::SigningFailed);
        }

        Ok(Self(compact))
    }

    fn split(&self) -> Result<(Signature, RecoveryId)> {
        let signature = Signature::from_slice(&self.0[..64])
            .map_err(|_| AttestationError::SigningFailed)?;
        let recovery = RecoveryId::from_byte(self.0[64].wrapping_sub(27))
            .ok_or(AttestationError::SigningFailed)?;
        Ok((signature, recovery))
    }
}

/// Long-lived signing identity for attestation digests.
///
/// Key material is loaded once at process start and is read-only
/// afterwards; concurrent signing needs no locking.
#[derive(Debug)]
pub struct ProofSigner {
    signing_key: SigningKey,
}

impl ProofSigner {
    /// Loads the signer from a hex-encoded secp256k1 scalar.
    ///
    /// # Errors
    ///
    /// Returns `AttestationError::InvalidKeyMaterial` if the hex is
    /// malformed or the scalar is not valid on the curve (zero or not
    /// below the curve order).
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let trimmed = hex_key.strip_prefix("0x").unwrap_or(hex_key);
        let bytes = hex::decode(trimmed)
            .map_err(|e| AttestationError::invalid_key_material(format!("bad hex: {e}")))?;

        let signing_key = SigningKey::from_slice(&bytes).map_err(|_| {
            AttestationError::invalid_key_material("not a valid secp256k1 scalar")
        })?;

        Ok(Self { signing_key })
    }

    /// Generates a fresh random signer.
    ///
    /// Suitable for tests and development; production keys come from
    /// configuration.
    pub fn ephemeral() -> Self {
        Self { signing_key: SigningKey::random(&mut OsRng) }
    }

    /// Signs a 32-byte digest, producing the compact recoverable form.
    ///
    /// Deterministic per RFC 6979; the same key and digest always yield
    /// the same signature. `s` is normalized to the lower half of the
    /// curve order, flipping the recovery bit when needed.
    ///
    /// # Errors
    ///
    /// Returns `AttestationError::SigningFailed` on arithmetic failure.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<CompactSignature> {
        let (signature, recovery) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|_| AttestationError::SigningFailed)?;

        let (signature, recovery) = match signature.normalize_s() {
            Some(normalized) => {
                let flipped = RecoveryId::from_byte(recovery.to_byte() ^ 1)
                    .ok_or(AttestationError::SigningFailed)?;
                (normalized, flipped)
            },
            None => (signature, recovery),
        };

        Ok(CompactSignature::from_parts(&signature, recovery))
    }

    /// Public half of the signing key.
    pub fn verifying_key(&self) -> VerifyingKey {
        *self.signing_key.verifying_key()
    }
}

/// Recovers the signing public key from a digest and compact signature.
///
/// This is the operation ledger-side verifiers perform; it is exposed
/// here for parity checks and tests.
///
/// # Errors
///
/// Returns `AttestationError::SigningFailed` if the signature is
/// malformed or recovery fails.
pub fn recover_verifying_key(
    digest: &[u8; 32],
    signature: &CompactSignature,
) -> Result<VerifyingKey> {
    let (sig, recovery) = signature.split()?;
    VerifyingKey::recover_from_prehash(digest, &sig, recovery)
        .map_err(|_| AttestationError::SigningFailed)
}
