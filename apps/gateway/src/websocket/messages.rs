//! WebSocket message types for the real-time hub
//!
//! Every frame on the wire is a JSON object of the form
//! `{"type": ..., "from": ..., "to": ..., "data": ..., "timestamp": ...}`.
//! The `data` shape depends on `type`; it is validated once at decode time
//! and carried as a typed [`Payload`] from then on.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GatewayError, GatewayResult};

/// Free-form key/value object carried by status, chat and notification messages
pub type Fields = Map<String, Value>;

// =============================================================================
// Message Types
// =============================================================================

/// Recognized values of the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Status,
    StatusUpdated,
    Chat,
    Notification,
}

impl MessageType {
    /// Wire name of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Binary => "binary",
            MessageType::Close => "close",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Status => "status",
            MessageType::StatusUpdated => "status_updated",
            MessageType::Chat => "chat",
            MessageType::Notification => "notification",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "binary" => Ok(MessageType::Binary),
            "close" => Ok(MessageType::Close),
            "ping" => Ok(MessageType::Ping),
            "pong" => Ok(MessageType::Pong),
            "status" => Ok(MessageType::Status),
            "status_updated" => Ok(MessageType::StatusUpdated),
            "chat" => Ok(MessageType::Chat),
            "notification" => Ok(MessageType::Notification),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Typed Payloads
// =============================================================================

/// Message body, one concrete shape per recognized type
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Plain text (`data` is a string)
    Text(String),

    /// Client-encoded binary content (`data` is a string)
    Binary(String),

    /// Client asks to end the session
    Close,

    /// Application-level liveness probe
    Ping,

    /// Reply to a ping
    Pong,

    /// Session status fields to merge into the session's metadata
    Status(Fields),

    /// Acknowledgment of a status update
    StatusUpdated,

    /// User-to-user chat (`data` is an object, `to` is required)
    Chat(Fields),

    /// Notification, routed to `to` or broadcast when `to` is empty
    Notification(Fields),
}

impl Payload {
    /// The `type` this payload is sent under
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Text(_) => MessageType::Text,
            Payload::Binary(_) => MessageType::Binary,
            Payload::Close => MessageType::Close,
            Payload::Ping => MessageType::Ping,
            Payload::Pong => MessageType::Pong,
            Payload::Status(_) => MessageType::Status,
            Payload::StatusUpdated => MessageType::StatusUpdated,
            Payload::Chat(_) => MessageType::Chat,
            Payload::Notification(_) => MessageType::Notification,
        }
    }

    /// Validate raw `data` against the shape required by `kind`
    fn from_data(kind: MessageType, data: Value) -> GatewayResult<Self> {
        match kind {
            MessageType::Text => match data {
                Value::String(text) => Ok(Payload::Text(text)),
                other => Err(shape_error(kind, "a string", &other)),
            },
            MessageType::Binary => match data {
                Value::String(encoded) => Ok(Payload::Binary(encoded)),
                other => Err(shape_error(kind, "a string", &other)),
            },
            MessageType::Close => Ok(Payload::Close),
            MessageType::Ping => Ok(Payload::Ping),
            MessageType::Pong => Ok(Payload::Pong),
            MessageType::StatusUpdated => Ok(Payload::StatusUpdated),
            // Only object data carries fields; anything else is an empty
            // merge that is still acknowledged.
            MessageType::Status => match data {
                Value::Object(fields) => Ok(Payload::Status(fields)),
                _ => Ok(Payload::Status(Fields::new())),
            },
            MessageType::Chat => match data {
                Value::Object(fields) => Ok(Payload::Chat(fields)),
                other => Err(shape_error(kind, "an object", &other)),
            },
            MessageType::Notification => match data {
                Value::Object(fields) => Ok(Payload::Notification(fields)),
                other => Err(shape_error(kind, "an object", &other)),
            },
        }
    }

    fn to_data(&self) -> Value {
        match self {
            Payload::Text(text) | Payload::Binary(text) => Value::String(text.clone()),
            Payload::Status(fields) | Payload::Chat(fields) | Payload::Notification(fields) => {
                Value::Object(fields.clone())
            }
            Payload::Close | Payload::Ping | Payload::Pong | Payload::StatusUpdated => Value::Null,
        }
    }
}

fn shape_error(kind: MessageType, expected: &str, got: &Value) -> GatewayError {
    let got = match got {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    };
    GatewayError::Decode(format!("{} data must be {}, got {}", kind, expected, got))
}

// =============================================================================
// Message Envelope
// =============================================================================

/// A routed unit of communication
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Typed body
    pub payload: Payload,

    /// Sender's user id (empty for server-originated messages)
    pub from: String,

    /// Target user id; empty means broadcast to everyone
    pub to: String,

    /// Unix timestamp in seconds; 0 means "not yet stamped"
    pub timestamp: i64,
}

/// Outcome of decoding an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A message with a recognized type and a valid payload
    Known(Message),

    /// A well-formed message whose type this hub does not handle
    Unknown(String),
}

/// JSON representation on the wire
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    to: Option<String>,

    #[serde(default)]
    data: Value,

    #[serde(default)]
    timestamp: i64,
}

impl Message {
    /// Create an unaddressed, unstamped message
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            from: String::new(),
            to: String::new(),
            timestamp: 0,
        }
    }

    /// Server reply to a client ping
    pub fn pong() -> Self {
        Self::new(Payload::Pong).stamped()
    }

    /// Server acknowledgment of a status update
    pub fn status_updated() -> Self {
        Self::new(Payload::StatusUpdated).stamped()
    }

    /// Address the message to a user
    pub fn with_to(mut self, user_id: impl Into<String>) -> Self {
        self.to = user_id.into();
        self
    }

    /// Set the sending user
    pub fn with_from(mut self, user_id: impl Into<String>) -> Self {
        self.from = user_id.into();
        self
    }

    /// Stamp the current time if no timestamp is set
    pub fn stamped(mut self) -> Self {
        if self.timestamp == 0 {
            self.timestamp = chrono::Utc::now().timestamp();
        }
        self
    }

    /// The message's `type`
    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// Whether the message goes to every connected session
    pub fn is_broadcast(&self) -> bool {
        self.to.is_empty()
    }

    /// Serialize to the JSON wire form
    pub fn encode(&self) -> GatewayResult<Bytes> {
        let wire = WireMessage {
            kind: self.message_type().as_str().to_string(),
            from: Some(self.from.clone()).filter(|s| !s.is_empty()),
            to: Some(self.to.clone()).filter(|s| !s.is_empty()),
            data: self.payload.to_data(),
            timestamp: self.timestamp,
        };
        Ok(Bytes::from(serde_json::to_vec(&wire)?))
    }

    /// Decode and validate one inbound frame
    ///
    /// Malformed JSON and invalid payload shapes are decode failures; a
    /// well-formed message with an unrecognized type is reported as
    /// [`Decoded::Unknown`] so the caller can ignore it.
    pub fn decode(raw: &[u8]) -> GatewayResult<Decoded> {
        let wire: WireMessage = serde_json::from_slice(raw)?;

        let Ok(kind) = wire.kind.parse::<MessageType>() else {
            return Ok(Decoded::Unknown(wire.kind));
        };

        Ok(Decoded::Known(Message {
            payload: Payload::from_data(kind, wire.data)?,
            from: wire.from.unwrap_or_default(),
            to: wire.to.unwrap_or_default(),
            timestamp: wire.timestamp,
        }))
    }
}
