//! Per-client session state
//!
//! A [`Session`] is shared (behind an `Arc`) between the dispatch loop, the
//! shard it lives in, the broadcast/ping workers and its own read/write
//! tasks. Everything mutable on it is either atomic or guarded internally,
//! so no outside locking is needed to touch a session.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::messages::{Fields, Message};
use super::transport::TransportError;
use crate::error::{GatewayError, GatewayResult};

/// Process-unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Raw id bytes, used for shard placement
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Bounded outbound queue of serialized messages
///
/// Many producers, one consumer (the session's write task). Closing the queue
/// drops the hub's sender; the write task observes the closure once any
/// in-flight sends finish and then ends the connection.
#[derive(Debug)]
pub struct OutboundQueue {
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
}

impl OutboundQueue {
    fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// A producer handle, or `None` once the queue has been closed
    pub fn sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Stop accepting messages
    pub fn close(&self) {
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    /// Whether the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(true, |tx| tx.is_closed())
    }
}

/// Server-side state for one connected client
#[derive(Debug)]
pub struct Session {
    id: SessionId,

    /// Caller identity; empty for anonymous sessions
    user_id: String,

    outbound: OutboundQueue,

    /// Cleared on timeout or error; dead sessions are skipped by workers
    alive: AtomicBool,

    /// Last liveness signal (Unix timestamp ms)
    last_heartbeat: AtomicI64,

    /// Ad hoc state set through status messages
    metadata: DashMap<String, Value>,

    /// Compression level resolved at connect time, if compression is enabled
    compression_level: Option<i32>,

    /// Wakes the write task to send a transport ping
    ping: Notify,

    /// Cancelled when the session must shut down
    shutdown: CancellationToken,
}

impl Session {
    /// Create a session and the receiving end of its outbound queue
    pub fn new(
        user_id: impl Into<String>,
        queue_capacity: usize,
        compression_level: Option<i32>,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = OutboundQueue::new(queue_capacity);

        let session = Self {
            id: SessionId::new(),
            user_id: user_id.into(),
            outbound,
            alive: AtomicBool::new(true),
            last_heartbeat: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            metadata: DashMap::new(),
            compression_level,
            ping: Notify::new(),
            shutdown: CancellationToken::new(),
        };

        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Whether the session can be reached through user-targeted delivery
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_empty()
    }

    pub fn compression_level(&self) -> Option<i32> {
        self.compression_level
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the session dead so workers skip it
    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Record a liveness signal
    pub fn touch(&self) {
        self.last_heartbeat
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Last liveness signal (Unix timestamp ms)
    pub fn last_heartbeat(&self) -> i64 {
        self.last_heartbeat.load(Ordering::Relaxed)
    }

    /// Whether no liveness signal was seen for longer than `timeout_ms`
    pub fn is_stale(&self, now_ms: i64, timeout_ms: i64) -> bool {
        now_ms - self.last_heartbeat() > timeout_ms
    }

    /// Merge status fields into the session metadata
    pub fn merge_metadata(&self, fields: Fields) {
        for (key, value) in fields {
            self.metadata.insert(key, value);
        }
    }

    /// Read one metadata entry
    pub fn metadata(&self, key: &str) -> Option<Value> {
        self.metadata.get(key).map(|entry| entry.value().clone())
    }

    /// Enqueue a message for this session without waiting
    ///
    /// Fails with `QueueSaturated` when the queue is full and with a transport
    /// error once the queue has been closed.
    pub fn send_message(&self, message: &Message) -> GatewayResult<()> {
        let payload = message.encode()?;
        let sender = self.outbound.sender().ok_or_else(TransportError::closed)?;
        sender.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => GatewayError::QueueSaturated,
            TrySendError::Closed(_) => TransportError::closed().into(),
        })
    }

    /// Ask the write task to send a transport-level ping
    pub fn request_ping(&self) {
        self.ping.notify_one();
    }

    /// Resolves when a ping has been requested
    pub async fn ping_requested(&self) {
        self.ping.notified().await
    }

    /// Force the session to shut down; its read and write tasks exit and the
    /// session is evicted through the normal path
    pub fn close(&self) {
        self.mark_dead();
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once [`Session::close`] has been called
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }
}
