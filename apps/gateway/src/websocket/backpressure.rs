//! Outbound delivery policy
//!
//! Every message that leaves the hub for a session, whether routed to a user
//! or fanned out by a broadcast worker, goes through
//! [`BackpressurePolicy::deliver`].

use std::time::Duration;

use bytes::Bytes;
use murmur_shared_config::WebSocketConfig;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};

use super::session::Session;

/// Result of one delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Enqueued on the session's outbound queue
    Queued,
    /// Queue full (or send timed out); the message was discarded
    Dropped,
    /// The session's queue is already closed
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct BackpressurePolicy {
    drop_on_full: bool,
    close_on_backpressure: bool,
    send_timeout: Duration,
}

impl BackpressurePolicy {
    pub fn new(drop_on_full: bool, close_on_backpressure: bool, send_timeout: Duration) -> Self {
        Self {
            drop_on_full,
            close_on_backpressure,
            send_timeout,
        }
    }

    pub fn from_config(config: &WebSocketConfig) -> Self {
        Self::new(
            config.drop_on_full,
            config.close_on_backpressure,
            config.send_timeout,
        )
    }

    /// Try to enqueue `payload` for `session`
    ///
    /// Returns immediately in drop-on-full mode; otherwise waits at most the
    /// configured send timeout.
    pub async fn deliver(&self, session: &Session, payload: Bytes) -> Delivery {
        let Some(sender) = session.outbound().sender() else {
            return Delivery::Closed;
        };

        let saturated = if self.drop_on_full {
            match sender.try_send(payload) {
                Ok(()) => false,
                Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Closed(_)) => return Delivery::Closed,
            }
        } else {
            match sender.send_timeout(payload, self.send_timeout).await {
                Ok(()) => false,
                Err(SendTimeoutError::Timeout(_)) => true,
                Err(SendTimeoutError::Closed(_)) => return Delivery::Closed,
            }
        };

        if saturated {
            self.on_drop(session);
            Delivery::Dropped
        } else {
            Delivery::Queued
        }
    }

    fn on_drop(&self, session: &Session) {
        tracing::warn!(
            session_id = %session.id(),
            user_id = %session.user_id(),
            close = self.close_on_backpressure,
            "Outbound queue saturated, message dropped"
        );

        if self.close_on_backpressure {
            session.close();
        }
    }
}
