//! Error types and result handling for attestation operations.
//!
//! Defines the structured error taxonomy with stable codes for client
//! disambiguation and HTTP status mapping. Covers validation, ownership,
//! quota, and infrastructure failures across the attestation pipeline.

use thiserror::Error;

/// Result type alias using [`CoreError`], for storage operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for internal storage operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(format!("unique constraint violation: {}", db_err))
            },
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                Self::ConstraintViolation(format!("foreign key constraint violation: {}", db_err))
            },
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                Self::ConstraintViolation(format!("check constraint violation: {}", db_err))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

/// Stable error codes surfaced in HTTP error bodies.
///
/// Codes map one-to-one to the error taxonomy. Clients key on these
/// strings; they never change once published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed input (bad condition list, bad action record).
    Validation,
    /// Rule exists but belongs to a different agent.
    OwnershipMismatch,
    /// Entity is in a state that forbids the operation.
    State,
    /// Principal's monthly issuance quota is exhausted.
    QuotaExceeded,
    /// Token bucket for the credential or peer address is empty.
    RateLimited,
    /// Referenced entity does not exist.
    NotFound,
    /// Sequence-number or digest collision at commit.
    Conflict,
    /// Ciphertext tag mismatch or key material on the wrong curve.
    Integrity,
    /// External ledger unreachable or rejected the commit.
    External,
    /// Anything else; details go to logs, never to clients.
    Internal,
}

impl ErrorCode {
    /// Wire form of the code.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::OwnershipMismatch => "OWNERSHIP_MISMATCH",
            Self::State => "STATE",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::RateLimited => "RATE_LIMITED",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Integrity => "INTEGRITY",
            Self::External => "EXTERNAL",
            Self::Internal => "INTERNAL",
        }
    }

    /// HTTP status the code maps to.
    pub const fn http_status(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::OwnershipMismatch => 403,
            Self::NotFound => 404,
            Self::State | Self::Conflict => 409,
            Self::QuotaExceeded | Self::RateLimited => 429,
            Self::External => 502,
            Self::Integrity | Self::Internal => 500,
        }
    }
}

/// Attestation service error taxonomy.
///
/// Every error that can surface at the HTTP boundary is a variant here.
/// Internal variants carry detail for logging; the public message and
/// code are produced by [`SigilError::code`] and `Display`.
#[derive(Debug, Error)]
pub enum SigilError {
    /// Malformed condition list or action record.
    #[error("{0}")]
    Validation(String),

    /// Rule belongs to a different agent than the caller.
    #[error("rule is not owned by the calling agent")]
    OwnershipMismatch,

    /// Entity state forbids the operation (archived rule, suspended agent).
    #[error("{0}")]
    State(String),

    /// Monthly issuance quota exhausted for the principal.
    #[error("monthly attestation quota exceeded")]
    QuotaExceeded,

    /// Request rejected by the token-bucket rate limiter.
    #[error("rate limit exceeded, retry later")]
    RateLimited,

    /// Referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Commit-time collision on the sequence number or digest.
    #[error("concurrent update conflict, retry the request")]
    Conflict,

    /// Envelope integrity violation or invalid key material.
    #[error("integrity violation")]
    Integrity,

    /// External ledger failure.
    #[error("external ledger unavailable")]
    External(String),

    /// Internal failure; detail is logged, never returned.
    #[error("internal error")]
    Internal(String),
}

impl SigilError {
    /// Returns the stable taxonomy code for this error.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::OwnershipMismatch => ErrorCode::OwnershipMismatch,
            Self::State(_) => ErrorCode::State,
            Self::QuotaExceeded => ErrorCode::QuotaExceeded,
            Self::RateLimited => ErrorCode::RateLimited,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Conflict => ErrorCode::Conflict,
            Self::Integrity => ErrorCode::Integrity,
            Self::External(_) => ErrorCode::External,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Returns whether retrying the identical request may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Conflict | Self::External(_))
    }
}

impl From<sqlx::Error> for SigilError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("entity"),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Self::Conflict,
            // 40001 serialization_failure, 40P01 deadlock_detected
            sqlx::Error::Database(db_err)
                if matches!(db_err.code().as_deref(), Some("40001" | "40P01")) =>
            {
                Self::Conflict
            },
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl From<CoreError> for SigilError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(_) => Self::NotFound("entity"),
            CoreError::ConstraintViolation(_) => Self::Conflict,
            CoreError::InvalidInput(msg) => Self::Validation(msg),
            CoreError::Database(msg) => Self::Internal(msg),
        }
    }
}

impl From<serde_json::Error> for SigilError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failure: {err}"))
    }
}
