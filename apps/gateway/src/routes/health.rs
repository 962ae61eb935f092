//! Health check HTTP route handlers
//!
//! Provides endpoints for checking the health of the gateway:
//! - `GET /health` - Simple liveness check (returns 200 OK)
//! - `GET /health/ready` - Readiness check (verifies the hub is running)
//! - `GET /health/live` - Kubernetes-style liveness probe

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use crate::websocket::{Hub, HubStats};

/// Shared application state for health check handlers
#[derive(Clone)]
pub struct HealthState {
    /// Real-time hub whose status is reported
    pub hub: Hub,
}

impl HealthState {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }
}

/// Readiness report
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub: Option<HubStats>,
}

/// Create health check router
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/", get(simple_health))
        .route("/live", get(liveness_probe))
        .route("/ready", get(readiness_probe))
        .with_state(state)
}

/// Simple health check - always returns OK if the server is running
///
/// # Response
/// - 200 OK with body "OK"
async fn simple_health() -> &'static str {
    "OK"
}

/// Liveness probe for Kubernetes
///
/// Returns 200 if the process can handle requests. The hub is not consulted;
/// that is what readiness is for.
async fn liveness_probe() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "alive",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness probe - checks that the hub's dispatch loop is accepting work
///
/// # Response
/// - 200 OK with session counts while the hub runs
/// - 503 Service Unavailable once it has stopped
async fn readiness_probe(State(state): State<HealthState>) -> impl IntoResponse {
    let stats = if state.hub.is_running() {
        state.hub.stats().await.ok()
    } else {
        None
    };

    let (status_code, status) = match stats {
        Some(_) => (StatusCode::OK, "ready"),
        None => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
    };

    let response = ReadinessResponse {
        status,
        connections: state.hub.connection_count(),
        hub: stats,
    };

    (status_code, Json(response))
}
