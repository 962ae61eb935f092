//! Real-time connection and fan-out hub
//!
//! This module handles:
//! - Session admission against a connection ceiling
//! - Routed (per-user) and broadcast delivery with backpressure
//! - Sharded fan-out across a broadcast worker pool
//! - Heartbeats and eviction of silent sessions

pub mod backpressure;
pub mod connection;
pub mod dispatch;
pub mod handler;
pub mod inbound;
pub mod messages;
pub mod registry;
pub mod session;
pub mod shard;
pub mod transport;
pub mod workers;

pub use backpressure::{BackpressurePolicy, Delivery};
pub use dispatch::{Hub, HubStats};
pub use handler::{ws_handler, ws_router, WsState};
pub use messages::{Decoded, Fields, Message, MessageType, Payload};
pub use session::{Session, SessionId};
pub use shard::shard_index;
pub use transport::{axum_transport, Frame, Transport, TransportError};
