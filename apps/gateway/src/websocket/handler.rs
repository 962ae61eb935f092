//! WebSocket upgrade handler
//!
//! The upstream authenticator is expected to have verified the caller and
//! put their identity in a request header. Requests without it are admitted
//! as anonymous sessions.

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{HeaderMap, HeaderName},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use super::dispatch::Hub;
use super::transport::axum_transport;
use crate::error::GatewayError;

/// Shared state for the upgrade route
#[derive(Clone)]
pub struct WsState {
    pub hub: Hub,
    /// Header carrying the authenticated user id
    pub identity_header: HeaderName,
}

impl WsState {
    pub fn new(hub: Hub, identity_header: HeaderName) -> Self {
        Self {
            hub,
            identity_header,
        }
    }
}

/// Create the WebSocket router (`GET /ws`)
pub fn ws_router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Read the caller identity; missing or non-UTF-8 values mean anonymous
pub fn identity_from_headers(headers: &HeaderMap, header: &HeaderName) -> String {
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Upgrade the request and hand the socket to the hub
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
    headers: HeaderMap,
) -> Response {
    if !state.hub.is_running() {
        return GatewayError::HubStopped.into_response();
    }

    let user_id = identity_from_headers(&headers, &state.identity_header);
    let config = state.hub.config();

    tracing::debug!(user_id = %user_id, "WebSocket upgrade requested");

    ws.write_buffer_size(config.write_buffer_size)
        .max_message_size(config.max_message_size)
        .on_upgrade(move |socket| async move {
            if let Err(e) = state.hub.connect(user_id, axum_transport(socket)).await {
                e.log();
            }
        })
}
