//! Test helper functions for gateway integration tests
//!
//! Provides an in-memory client that talks to a running hub through the
//! mock transport, plus polling helpers for eventually-consistent state.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use murmur_gateway::websocket::{Frame, Hub, Session, TransportError};
use murmur_gateway::GatewayResult;
use murmur_test_utils::{mock_transport, MockPeer, MockTransport};
use serde_json::Value;

/// How long a client waits for an expected message
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a client listens before declaring "nothing arrived"
pub const SILENCE_WINDOW: Duration = Duration::from_millis(150);

pub type TestTransport = MockTransport<Frame, TransportError>;
pub type TestPeer = MockPeer<Frame, TransportError>;

/// Create a transport/peer pair speaking gateway frames
pub fn test_transport() -> (TestTransport, TestPeer) {
    mock_transport(TransportError::closed)
}

/// A connected in-memory client
pub struct TestClient {
    pub session: Arc<Session>,
    peer: TestPeer,
    pending: VecDeque<Value>,
}

impl TestClient {
    /// Connect a client as `user_id`, panicking if admission fails
    pub async fn connect(hub: &Hub, user_id: &str) -> Self {
        match Self::try_connect(hub, user_id).await {
            Ok(client) => client,
            Err(e) => panic!("admission of {user_id:?} failed: {e}"),
        }
    }

    pub async fn try_connect(hub: &Hub, user_id: &str) -> GatewayResult<Self> {
        let (transport, peer) = test_transport();
        let session = hub.connect(user_id, transport).await?;
        Ok(Self {
            session,
            peer,
            pending: VecDeque::new(),
        })
    }

    /// Send a JSON message as a text frame
    pub fn send_json(&self, value: Value) -> bool {
        self.peer.send(Frame::Text(value.to_string()))
    }

    /// Send a raw frame
    pub fn send_frame(&self, frame: Frame) -> bool {
        self.peer.send(frame)
    }

    /// Make the server's next read fail
    pub fn fail(&self, reason: &str) -> bool {
        self.peer.fail(TransportError::new(reason))
    }

    /// Stop reading: the server's writes to this client block
    pub fn stall(&self) {
        self.peer.stall_writes();
    }

    pub fn resume(&self) {
        self.peer.resume_writes();
    }

    /// Go away without a close frame
    pub fn disconnect(&mut self) {
        self.peer.disconnect();
    }

    /// Next raw frame from the server, including control frames
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        self.peer.recv_timeout(RECV_TIMEOUT).await
    }

    /// Next JSON message from the server
    ///
    /// Coalesced frames are split on newlines; transport pings are skipped.
    /// Returns `None` on close or timeout.
    pub async fn recv(&mut self) -> Option<Value> {
        self.recv_within(RECV_TIMEOUT).await
    }

    pub async fn recv_within(&mut self, timeout: Duration) -> Option<Value> {
        loop {
            if let Some(value) = self.pending.pop_front() {
                return Some(value);
            }

            let text = match self.peer.recv_timeout(timeout).await? {
                Frame::Text(text) => text,
                Frame::Binary(data) => String::from_utf8(data.to_vec()).ok()?,
                Frame::Ping(_) | Frame::Pong(_) => continue,
                Frame::Close => return None,
            };

            for line in text.split('\n').filter(|line| !line.is_empty()) {
                let value = serde_json::from_str(line).expect("server sent invalid JSON");
                self.pending.push_back(value);
            }
        }
    }

    /// Receive the next message and check its type
    pub async fn expect_type(&mut self, kind: &str) -> Value {
        let value = self
            .recv()
            .await
            .unwrap_or_else(|| panic!("expected a {kind:?} message, got nothing"));
        assert_eq!(value["type"], kind, "unexpected message: {value}");
        value
    }

    /// Assert that no data message arrives within the silence window
    pub async fn assert_silent(&mut self) {
        if let Some(value) = self.recv_within(SILENCE_WINDOW).await {
            panic!("expected silence, got {value}");
        }
    }

    /// Wait for the server to close the connection, draining anything it sent
    pub async fn closed(&mut self) -> Option<Vec<Frame>> {
        self.peer.closed_within(RECV_TIMEOUT).await
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if condition().await {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the hub reports `expected` admitted sessions
pub async fn wait_for_connections(hub: &Hub, expected: usize) -> bool {
    eventually(RECV_TIMEOUT, move || async move { hub.connection_count() == expected }).await
}
