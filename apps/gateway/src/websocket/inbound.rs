//! Inbound message handling
//!
//! Processes messages decoded from a session's read loop. Replies that
//! concern only the sender (pong, status acknowledgments) go straight onto
//! its outbound queue; chat and notifications are handed to the hub for
//! routing.

use std::ops::ControlFlow;
use std::sync::Arc;

use super::dispatch::Hub;
use super::messages::{Decoded, Message, Payload};
use super::session::Session;

/// Handler for messages from one session
pub struct InboundHandler {
    session: Arc<Session>,
    hub: Hub,
}

impl InboundHandler {
    pub fn new(session: Arc<Session>, hub: Hub) -> Self {
        Self { session, hub }
    }

    /// Decode and handle one raw frame
    ///
    /// Malformed frames and unknown types are logged and dropped; the
    /// session carries on. Breaks only when the client asks to close.
    pub async fn handle_frame(&self, raw: &[u8]) -> ControlFlow<()> {
        match Message::decode(raw) {
            Ok(Decoded::Known(message)) => {
                // Senders cannot speak for other users.
                let message = message.with_from(self.session.user_id());
                self.handle_message(message).await
            }
            Ok(Decoded::Unknown(kind)) => {
                tracing::info!(
                    session_id = %self.session.id(),
                    kind = %kind,
                    "Unknown message type"
                );
                ControlFlow::Continue(())
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session.id(),
                    user_id = %self.session.user_id(),
                    error = %e,
                    "Failed to decode inbound message"
                );
                ControlFlow::Continue(())
            }
        }
    }

    /// Handle a decoded message
    pub async fn handle_message(&self, message: Message) -> ControlFlow<()> {
        match &message.payload {
            Payload::Ping => {
                self.session.touch();
                self.reply(Message::pong());
            }
            Payload::Status(fields) => {
                self.session.merge_metadata(fields.clone());
                self.reply(Message::status_updated());
            }
            Payload::Chat(_) if message.to.is_empty() => {
                tracing::info!(
                    session_id = %self.session.id(),
                    user_id = %self.session.user_id(),
                    "Chat message is missing a target, dropped"
                );
            }
            Payload::Chat(_) | Payload::Notification(_) => self.submit(message).await,
            Payload::Close => return ControlFlow::Break(()),
            Payload::Text(_) | Payload::Binary(_) | Payload::Pong | Payload::StatusUpdated => {
                tracing::debug!(
                    session_id = %self.session.id(),
                    kind = %message.message_type(),
                    "Ignoring message with no inbound handler"
                );
            }
        }

        ControlFlow::Continue(())
    }

    /// Best-effort reply to this session only
    fn reply(&self, message: Message) {
        if let Err(e) = self.session.send_message(&message) {
            tracing::debug!(
                session_id = %self.session.id(),
                kind = %message.message_type(),
                error = %e,
                "Reply dropped"
            );
        }
    }

    async fn submit(&self, message: Message) {
        if let Err(e) = self.hub.submit(message).await {
            tracing::warn!(
                session_id = %self.session.id(),
                error = %e,
                "Failed to submit message for routing"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_shared_config::WebSocketConfig;
    use serde_json::Value;
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    fn handler(user_id: &str) -> (InboundHandler, Arc<Session>, mpsc::Receiver<bytes::Bytes>, Hub) {
        let hub = Hub::start(WebSocketConfig::default());
        let (session, rx) = Session::new(user_id, 4, None);
        let session = Arc::new(session);
        (InboundHandler::new(session.clone(), hub.clone()), session, rx, hub)
    }

    fn decode(raw: &[u8]) -> Value {
        serde_json::from_slice(raw).unwrap()
    }

    #[tokio::test]
    async fn test_ping_replies_with_single_pong() {
        let (handler, _session, mut rx, hub) = handler("u1");

        let flow = handler.handle_frame(br#"{"type":"ping"}"#).await;
        assert!(flow.is_continue());

        let reply = decode(&rx.recv().await.unwrap());
        assert_eq!(reply["type"], "pong");
        assert!(reply["timestamp"].as_i64().unwrap() > 0);
        assert!(rx.try_recv().is_err());
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_status_merges_metadata_and_acks() {
        let (handler, session, mut rx, hub) = handler("u1");

        handler
            .handle_frame(br#"{"type":"status","data":{"mood":"busy"}}"#)
            .await;

        assert_eq!(session.metadata("mood"), Some(Value::from("busy")));
        let reply = decode(&rx.recv().await.unwrap());
        assert_eq!(reply["type"], "status_updated");
        assert_eq!(reply["data"], Value::Null);
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_status_with_non_object_data_is_still_acked() {
        let (handler, session, mut rx, hub) = handler("u1");

        let flow = handler
            .handle_frame(br#"{"type":"status","data":"busy"}"#)
            .await;
        assert!(flow.is_continue());

        let reply = decode(&rx.recv().await.unwrap());
        assert_eq!(reply["type"], "status_updated");
        assert_eq!(session.metadata("busy"), None);
        assert!(rx.try_recv().is_err());
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_close_message_breaks() {
        let (handler, _session, _rx, hub) = handler("u1");
        assert!(handler.handle_frame(br#"{"type":"close"}"#).await.is_break());
        hub.shutdown();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_malformed_and_unknown_are_ignored() {
        let (handler, _session, mut rx, hub) = handler("u1");

        assert!(handler.handle_frame(b"not json").await.is_continue());
        assert!(handler
            .handle_frame(br#"{"type":"typing"}"#)
            .await
            .is_continue());
        assert!(handler
            .handle_frame(br#"{"type":"chat","to":"u2","data":"oops"}"#)
            .await
            .is_continue());

        assert!(rx.try_recv().is_err());
        assert!(logs_contain("Failed to decode inbound message"));
        assert!(logs_contain("Unknown message type"));
        hub.shutdown();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_chat_without_target_is_dropped() {
        let (handler, _session, _rx, hub) = handler("u1");
        handler
            .handle_frame(br#"{"type":"chat","data":{"body":"hi"}}"#)
            .await;
        assert!(logs_contain("missing a target"));
        hub.shutdown();
    }
}
