//! Error handling for the Murmur gateway
//!
//! This module provides a unified error type using thiserror. Every variant
//! is scoped to a single session or request: none of them is allowed to take
//! down the hub, its worker pools, or any other session. Errors that surface
//! at the HTTP boundary map to a status code via Axum's IntoResponse trait.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::websocket::TransportError;

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for client-side handling
    pub code: &'static str,
    /// Human-readable error message
    pub message: String,
}

/// Main gateway error type
#[derive(Error, Debug)]
pub enum GatewayError {
    // ========== Admission ==========
    /// Capacity ceiling reached; the transport has been closed
    #[error("connection limit reached ({max} active sessions)")]
    AdmissionRejected { max: usize },

    /// The dispatch loop is no longer running
    #[error("hub is not running")]
    HubStopped,

    // ========== Session-scoped failures ==========
    /// Read/write error or abnormal close on the underlying socket
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Inbound frame could not be decoded into a message
    #[error("malformed message: {0}")]
    Decode(String),

    /// Outbound queue (or job queue) cannot take another message
    #[error("send queue is full")]
    QueueSaturated,

    /// No liveness signal within the configured connection timeout
    #[error("heartbeat timeout")]
    HeartbeatTimeout,
}

impl GatewayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 503 Service Unavailable
            Self::AdmissionRejected { .. } | Self::HubStopped => StatusCode::SERVICE_UNAVAILABLE,

            // 400 Bad Request
            Self::Decode(_) => StatusCode::BAD_REQUEST,

            // 500 Internal Server Error
            Self::Transport(_) | Self::QueueSaturated | Self::HeartbeatTimeout => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the error code string for client-side handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AdmissionRejected { .. } => "ADMISSION_REJECTED",
            Self::HubStopped => "HUB_STOPPED",
            Self::Transport(_) => "TRANSPORT_FAILURE",
            Self::Decode(_) => "DECODE_FAILURE",
            Self::QueueSaturated => "QUEUE_SATURATED",
            Self::HeartbeatTimeout => "HEARTBEAT_TIMEOUT",
        }
    }

    /// Log the error with appropriate severity based on status code
    pub fn log(&self) {
        let status = self.status_code();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(
                error = %self,
                code = self.error_code(),
                status = status.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = %self,
                code = self.error_code(),
                status = status.as_u16(),
                "Request refused"
            );
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.status_code();
        let error_response = ErrorResponse {
            code: self.error_code(),
            message: self.to_string(),
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
