//! Transport boundary between the hub and an upgraded socket
//!
//! The hub never touches a concrete socket type. It works against any
//! [`Transport`]: a stream of inbound [`Frame`]s paired with a sink for
//! outbound ones. [`axum_transport`] adapts an upgraded axum WebSocket.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;

/// A single transport-level frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

impl Frame {
    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) | Frame::Ping(data) | Frame::Pong(data) => data.len(),
            Frame::Close => 0,
        }
    }

    /// Whether the frame carries no payload
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read/write failure on the underlying socket
#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(String);

impl TransportError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    /// Error for writing to a socket that has already gone away
    pub fn closed() -> Self {
        Self::new("connection closed")
    }
}

impl From<axum::Error> for TransportError {
    fn from(err: axum::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// A bidirectional, frame-oriented socket
///
/// Implemented for every type that is both a stream of inbound frames and a
/// sink for outbound frames.
pub trait Transport:
    Stream<Item = Result<Frame, TransportError>>
    + Sink<Frame, Error = TransportError>
    + Send
    + Unpin
    + 'static
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<Frame, TransportError>>
        + Sink<Frame, Error = TransportError>
        + Send
        + Unpin
        + 'static
{
}

impl From<WsMessage> for Frame {
    fn from(msg: WsMessage) -> Self {
        match msg {
            WsMessage::Text(text) => Frame::Text(text),
            WsMessage::Binary(data) => Frame::Binary(Bytes::from(data)),
            WsMessage::Ping(data) => Frame::Ping(Bytes::from(data)),
            WsMessage::Pong(data) => Frame::Pong(Bytes::from(data)),
            WsMessage::Close(_) => Frame::Close,
        }
    }
}

impl From<Frame> for WsMessage {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => WsMessage::Text(text),
            Frame::Binary(data) => WsMessage::Binary(data.to_vec()),
            Frame::Ping(data) => WsMessage::Ping(data.to_vec()),
            Frame::Pong(data) => WsMessage::Pong(data.to_vec()),
            Frame::Close => WsMessage::Close(None),
        }
    }
}

/// Adapt an upgraded axum WebSocket into a [`Transport`]
pub fn axum_transport(socket: WebSocket) -> impl Transport {
    socket
        .map(|result| result.map(Frame::from).map_err(TransportError::from))
        .sink_map_err(TransportError::from)
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(WsMessage::from(frame))))
}
