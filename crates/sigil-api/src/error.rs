//! HTTP error responses with stable taxonomy codes.
//!
//! Every error body is `{error, code, status}`. Internal errors are
//! logged with a correlation id and returned with a generic message;
//! key material, SQL text, and stack traces never leave the process.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sigil_core::SigilError;
use tracing::error;
use uuid::Uuid;

/// Wire form of an error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,

    /// Stable taxonomy code.
    pub code: &'static str,

    /// HTTP status, duplicated in the body for client convenience.
    pub status: u16,
}

/// Axum-compatible wrapper around the error taxonomy.
#[derive(Debug)]
pub struct ApiError(pub SigilError);

impl From<SigilError> for ApiError {
    fn from(err: SigilError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = StatusCode::from_u16(code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match &self.0 {
            SigilError::Internal(detail) => {
                let correlation_id = Uuid::new_v4();
                error!(%correlation_id, detail = %detail, "internal error");
                "internal error".to_string()
            },
            other => other.to_string(),
        };

        let body = ErrorBody { error: message, code: code.as_str(), status: status.as_u16() };
        (status, Json(body)).into_response()
    }
}
