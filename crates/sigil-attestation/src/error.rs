//! Error types and result handling for attestation operations.
//!
//! Covers key material loading, envelope encryption, Merkle tree
//! construction, external ledger anchoring, and database persistence with
//! detailed context for debugging attestation failures.

use sigil_core::SigilError;

/// Errors that can occur during attestation operations.
#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    /// Key material is malformed or not a valid scalar on the curve.
    #[error("invalid key material: {message}")]
    InvalidKeyMaterial {
        /// Detailed error message explaining the format issue.
        message: String,
    },

    /// Signing the digest failed.
    #[error("signing failed")]
    SigningFailed,

    /// Envelope framing is malformed or the authentication tag does not
    /// verify. Every decrypt failure collapses into this variant so the
    /// caller cannot distinguish tampering modes.
    #[error("envelope integrity violation")]
    Integrity,

    /// A stored digest is not `0x` + 64 hex characters.
    #[error("malformed digest: {digest}")]
    MalformedDigest {
        /// The offending digest string, truncated for logging.
        digest: String,
    },

    /// Merkle batch has no leaves.
    #[error("merkle batch must contain at least one leaf")]
    EmptyBatch,

    /// Merkle batch exceeds the maximum leaf count.
    #[error("merkle batch of {count} leaves exceeds the {max} leaf limit")]
    BatchTooLarge {
        /// Number of leaves requested.
        count: usize,
        /// Maximum allowed leaves per batch.
        max: usize,
    },

    /// Two identical digests were submitted in one batch.
    #[error("duplicate leaf in merkle batch")]
    DuplicateLeaf,

    /// The external ledger could not be reached or rejected the commit.
    #[error("ledger anchoring failed: {reason}")]
    Ledger {
        /// Reason for the anchoring failure.
        reason: String,
    },

    /// The batch cycle exceeded its wall-clock deadline.
    #[error("batch cycle deadline exceeded")]
    DeadlineExceeded,

    /// Database operation failed.
    #[error("database error: {source}")]
    Database {
        /// Underlying database error.
        #[from]
        source: sqlx::Error,
    },

    /// Repository layer failure during batch processing.
    #[error("storage error: {reason}")]
    Storage {
        /// Description of the failed operation.
        reason: String,
    },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl AttestationError {
    /// Create an invalid key material error with a custom message.
    pub fn invalid_key_material(message: impl Into<String>) -> Self {
        Self::InvalidKeyMaterial { message: message.into() }
    }

    /// Create a ledger error with a custom reason.
    pub fn ledger(reason: impl Into<String>) -> Self {
        Self::Ledger { reason: reason.into() }
    }

    /// Create a storage error from a repository failure.
    pub fn storage(err: sigil_core::CoreError) -> Self {
        Self::Storage { reason: err.to_string() }
    }

    /// Check if this error indicates a retryable operation.
    ///
    /// Ledger and database connectivity issues are retried on the next
    /// batch cycle; cryptographic and validation errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger { .. } | Self::DeadlineExceeded | Self::Storage { .. } => true,
            Self::Database { source } => matches!(
                source,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::Tls(_)
            ),
            Self::InvalidKeyMaterial { .. }
            | Self::SigningFailed
            | Self::Integrity
            | Self::MalformedDigest { .. }
            | Self::EmptyBatch
            | Self::BatchTooLarge { .. }
            | Self::DuplicateLeaf
            | Self::Serialization { .. } => false,
        }
    }
}

impl From<AttestationError> for SigilError {
    fn from(err: AttestationError) -> Self {
        match err {
            AttestationError::Integrity | AttestationError::InvalidKeyMaterial { .. } => {
                Self::Integrity
            },
            AttestationError::Ledger { reason } => Self::External(reason),
            AttestationError::DeadlineExceeded => {
                Self::External("ledger call deadline exceeded".to_string())
            },
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Result type alias for attestation operations.
pub type Result<T> = std::result::Result<T, AttestationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_classification() {
        assert!(AttestationError::ledger("connection refused").is_retryable());
        assert!(AttestationError::DeadlineExceeded.is_retryable());

        assert!(!AttestationError::Integrity.is_retryable());
        assert!(!AttestationError::EmptyBatch.is_retryable());
        assert!(!AttestationError::invalid_key_material("wrong size").is_retryable());
    }

    #[test]
    fn converts_into_public_taxonomy() {
        use sigil_core::ErrorCode;

        assert_eq!(SigilError::from(AttestationError::Integrity).code(), ErrorCode::Integrity);
        assert_eq!(
            SigilError::from(AttestationError::ledger("down")).code(),
            ErrorCode::External
        );
        assert_eq!(SigilError::from(AttestationError::EmptyBatch).code(), ErrorCode::Internal);
    }

    #[test]
    fn error_message_formatting() {
        let err = AttestationError::BatchTooLarge { count: 501, max: 500 };
        assert_eq!(err.to_string(), "merkle batch of 501 leaves exceeds the 500 leaf limit");
    }
}
