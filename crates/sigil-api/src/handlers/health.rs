//! Health check handlers for service monitoring.
//!
//! Provides liveness, readiness, and health endpoints with database
//! connectivity checks for orchestration systems. The health report also
//! surfaces degraded mode: a service without signing material keeps
//! serving reads but cannot issue.

use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sigil_core::Clock;
use tracing::{debug, error, instrument};

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Individual component health checks
    pub checks: HealthChecks,
    /// Service version information
    pub version: String,
}

/// Overall health status enumeration.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Reads work but issuance is disabled (missing key material)
    Degraded,
    /// Critical systems failing
    Unhealthy,
}

/// Individual component health check results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Database connectivity and basic query test
    pub database: ComponentHealth,
    /// Whether signing and envelope keys are loaded
    pub issuance: ComponentHealth,
}

/// Health status for individual components.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Component status
    pub status: ComponentStatus,
    /// Optional error message if unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response time in milliseconds
    pub response_time_ms: u64,
}

/// Component-level health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy
    Up,
    /// Component is experiencing issues
    Down,
}

/// Primary health check endpoint.
///
/// Performs lightweight checks of critical system components. Storage
/// failure makes the service unhealthy (503); missing crypto material
/// only degrades it, because reads stay available.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let timestamp = state.clock.now_utc();
    let start = Instant::now();

    let database = match state.storage.health_check().await {
        Ok(()) => {
            debug!("Database health check passed");
            ComponentHealth {
                status: ComponentStatus::Up,
                message: None,
                response_time_ms: elapsed_ms(start),
            }
        },
        Err(e) => {
            error!("Database health check failed: {}", e);
            ComponentHealth {
                status: ComponentStatus::Down,
                message: Some("database connection failed".to_string()),
                response_time_ms: elapsed_ms(start),
            }
        },
    };

    let issuance = if state.issuer.issuance_enabled() {
        ComponentHealth { status: ComponentStatus::Up, message: None, response_time_ms: 0 }
    } else {
        ComponentHealth {
            status: ComponentStatus::Down,
            message: Some("signing or envelope key not configured".to_string()),
            response_time_ms: 0,
        }
    };

    let status = match (database.status, issuance.status) {
        (ComponentStatus::Down, _) => HealthStatus::Unhealthy,
        (ComponentStatus::Up, ComponentStatus::Down) => HealthStatus::Degraded,
        (ComponentStatus::Up, ComponentStatus::Up) => HealthStatus::Healthy,
    };

    let response = HealthResponse {
        status,
        timestamp,
        checks: HealthChecks { database, issuance },
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(status = ?response.status, "Health check completed");

    (status_code, Json(response)).into_response()
}

/// Readiness check endpoint for orchestration probes.
///
/// Identical to the health check: a degraded service is still ready for
/// read traffic.
#[instrument(name = "readiness_check", skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    health_check(State(state)).await
}

/// Liveness check endpoint for orchestration probes.
///
/// Minimal check that the HTTP server is responding; does not touch
/// external dependencies.
#[instrument(name = "liveness_check", skip(state))]
pub async fn liveness_check(State(state): State<AppState>) -> Response {
    let response = serde_json::json!({
        "status": "alive",
        "timestamp": state.clock.now_utc(),
        "service": "sigil-api"
    });

    (StatusCode::OK, Json(response)).into_response()
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
