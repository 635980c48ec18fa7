//! HTTP API server and request handling.
//!
//! Provides REST endpoints for attestation issuance, public verification,
//! rule management, and health checks. Includes credential middleware,
//! token-bucket rate limiting, and structured error responses with stable
//! taxonomy codes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use sigil_attestation::IssuerService;
use sigil_core::{storage::Storage, Clock};

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use config::Config;
pub use error::ApiError;
pub use server::{create_router, start_server};

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Repository access.
    pub storage: Arc<Storage>,

    /// Time source for handlers.
    pub clock: Arc<dyn Clock>,

    /// Attestation coordinator.
    pub issuer: Arc<IssuerService>,

    /// Base URL used to build public verification links.
    pub verify_base_url: String,
}

impl AppState {
    /// Creates the application state.
    pub fn new(
        storage: Arc<Storage>,
        clock: Arc<dyn Clock>,
        issuer: Arc<IssuerService>,
        verify_base_url: impl Into<String>,
    ) -> Self {
        Self { storage, clock, issuer, verify_base_url: verify_base_url.into() }
    }

    /// Public verification URL for a proof.
    pub fn verify_url(&self, proof_id: sigil_core::ProofId) -> String {
        format!("{}/verify/{proof_id}", self.verify_base_url.trim_end_matches('/'))
    }
}
