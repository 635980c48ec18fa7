//! Agent credential middleware.
//!
//! Validates Bearer API keys from the Authorization header, performs a
//! database lookup against SHA-256 key hashes, and injects the resolved
//! (principal, agent) identity for downstream handlers.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sigil_core::storage::Storage;

/// Extracts the API key from the Authorization header.
/// Supports Bearer token format: "Bearer <api-key>"
fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(String::from)
}

/// Hashes a plaintext API key into its stored form.
pub fn hash_api_key(api_key: &str) -> String {
    sha256::digest(api_key.as_bytes())
}

/// Errors that can occur during credential resolution.
#[derive(Debug)]
pub enum AuthError {
    /// The provided API key is invalid, expired, or revoked.
    InvalidApiKey,
    /// A database error occurred while validating the API key.
    Database(String),
    /// The Authorization header is missing from the request.
    MissingHeader,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::InvalidApiKey => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Invalid API key")
            },
            Self::MissingHeader => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Missing Authorization header")
            },
            Self::Database(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "internal error")
            },
        };

        let body = json!({"error": message, "code": code, "status": status.as_u16()});
        (status, Json(body)).into_response()
    }
}

/// Axum middleware that authenticates requests using agent API keys.
///
/// On success the request carries a
/// [`sigil_core::storage::api_keys::CredentialIdentity`] extension.
pub async fn auth_middleware(
    State(storage): State<Arc<Storage>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let api_key = extract_api_key(req.headers()).ok_or(AuthError::MissingHeader)?;
    let key_hash = hash_api_key(&api_key);

    let identity = storage
        .api_keys
        .resolve(&key_hash)
        .await
        .map_err(|e| AuthError::Database(e.to_string()))?
        .ok_or(AuthError::InvalidApiKey)?;

    // Usage stamp is best-effort; a failure must not block the request.
    let _ = storage.api_keys.touch(&key_hash).await;

    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}
