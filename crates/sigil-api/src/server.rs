//! HTTP server configuration and request routing.
//!
//! Provides Axum server setup with middleware stack, graceful shutdown,
//! and connection pooling integration. Requests flow through middleware
//! in order:
//! 1. Request ID generation
//! 2. Request/response logging
//! 3. Timeout enforcement (30s default)
//! 4. Rate limiting (issuance routes)
//! 5. Authentication (issuance and rule routes)
//! 6. Handler execution
//!
//! # Graceful Shutdown
//!
//! The server handles SIGTERM gracefully: it stops accepting new
//! connections, waits for in-flight requests, and returns.

use std::{net::SocketAddr, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    handlers,
    middleware::{auth::auth_middleware, rate_limit::{rate_limit_middleware, RateLimiter}},
    AppState,
};

/// Creates the Axum router with all routes and middleware.
///
/// Public routes (`/verify`, probes) skip authentication; issuance and
/// rule management require an agent credential, and issuance is
/// additionally guarded by the token-bucket rate limiter before any
/// database work.
pub fn create_router(state: AppState, config: &Config) -> Router {
    let limiter = RateLimiter::new(config.rate_limit_burst, config.rate_limit_per_second);

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        .route("/verify/{proof_id}", get(handlers::verify_proof))
        .with_state(state.clone());

    let issue_routes = Router::new()
        .route("/issue", post(handlers::issue_proof))
        .layer(middleware::from_fn_with_state(state.storage.clone(), auth_middleware))
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .with_state(state.clone());

    let rule_routes = Router::new()
        .route("/rules", post(handlers::create_rule))
        .route("/rules/{rule_id}", get(handlers::get_rule).put(handlers::update_rule))
        .route("/rules/{rule_id}/archive", post(handlers::archive_rule))
        .layer(middleware::from_fn_with_state(state.storage.clone(), auth_middleware))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(issue_routes)
        .merge(rule_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout)))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
}

/// Middleware to inject request ID into all responses.
///
/// Adds X-Request-Id header for tracing requests across services; the
/// same id is the correlation id in internal error logs.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let mut req = req;
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Starts the HTTP server with graceful shutdown support.
///
/// Binds to the specified address and serves requests until a shutdown
/// signal is received.
///
/// # Errors
///
/// Returns `std::io::Error` if the port is already in use or the
/// network interface is unavailable.
pub async fn start_server(
    state: AppState,
    config: &Config,
    addr: SocketAddr,
) -> Result<(), std::io::Error> {
    let app = create_router(state, config);

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    warn!("Waiting for in-flight requests to complete");
}
