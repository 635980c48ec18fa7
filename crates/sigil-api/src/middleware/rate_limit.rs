//! Token-bucket rate limiting for the issuance entry point.
//!
//! Two buckets guard every request: one keyed by the presented
//! credential, one by the peer address. Exhaustion rejects the request
//! before any database work. Buckets refill continuously at the
//! configured sustained rate up to the burst capacity.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Instant,
};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use sigil_core::SigilError;

use crate::error::ApiError;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared token-bucket registry.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
    capacity: f64,
    refill_per_second: f64,
}

impl RateLimiter {
    /// Creates a limiter with the given burst capacity and sustained
    /// refill rate.
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            capacity: f64::from(capacity),
            refill_per_second,
        }
    }

    /// Takes one token from the bucket for `key`, refilling first.
    ///
    /// Returns false when the bucket is empty.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket { tokens: self.capacity, last_refill: now });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Axum middleware enforcing per-credential and per-peer buckets.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    // The peer address is present when the server is started with
    // connect info; tests without it share one bucket.
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if !limiter.try_acquire(&format!("peer:{peer}")) {
        return Err(ApiError(SigilError::RateLimited));
    }

    // Key on the raw header value: the credential has not been resolved
    // yet, and hitting the database here would defeat the guard.
    if let Some(credential) = req.headers().get("authorization").and_then(|v| v.to_str().ok()) {
        let credential_key = format!("cred:{}", crate::middleware::auth::hash_api_key(credential));
        if !limiter.try_acquire(&credential_key) {
            return Err(ApiError(SigilError::RateLimited));
        }
    }

    Ok(next.run(req).await)
}
