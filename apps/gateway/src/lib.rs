//! Murmur gateway library
//!
//! This module exposes the real-time hub and the HTTP surface around it for
//! use by the binary and by integration tests.

pub mod config;
pub mod error;
pub mod routes;
pub mod websocket;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

// Re-export commonly used types
pub use error::{ErrorResponse, GatewayError, GatewayResult};
pub use websocket::{Hub, HubStats, Message, Payload, Session};

use routes::{health_router, HealthState};
use websocket::{ws_router, WsState};

/// Build the full HTTP router around a running hub
pub fn app(hub: Hub, identity_header: axum::http::HeaderName) -> Router {
    Router::new()
        .route("/", get(root))
        // Nested health routes: /health, /health/live, /health/ready
        .nest("/health", health_router(HealthState::new(hub.clone())))
        // WebSocket upgrade: /ws
        .merge(ws_router(WsState::new(hub, identity_header)))
        .layer(TraceLayer::new_for_http())
}

async fn root() -> &'static str {
    "Murmur real-time gateway"
}
