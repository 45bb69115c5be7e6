use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::ChatMessage;

/// Keepalive control frames, `{"type":"ping"}` / `{"type":"pong"}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    Ping,
    Pong,
}

/// Frames sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClientFrame {
    Control(ControlFrame),
    Chat { content: String },
}

impl ClientFrame {
    pub fn ping() -> Self {
        Self::Control(ControlFrame::Ping)
    }

    pub fn chat(content: impl Into<String>) -> Self {
        Self::Chat {
            content: content.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frames received from the server, classified
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Keepalive acknowledgment, consumed by the connection manager
    Pong,
    /// A chat message broadcast to the room
    Message(ChatMessage),
    /// Delivery receipt for a message this client sent
    Delivered { message_id: Option<i64> },
    /// Any other well-formed payload
    Other(Value),
}

impl ServerFrame {
    /// Parse a text frame. Only frames that are not valid JSON are errors;
    /// unknown shapes come back as [`ServerFrame::Other`].
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::classify(value))
    }

    fn classify(value: Value) -> Self {
        if value.get("type").and_then(Value::as_str) == Some("pong") {
            return Self::Pong;
        }

        if value.get("status").and_then(Value::as_str) == Some("delivered") {
            return Self::Delivered {
                message_id: value.get("message_id").and_then(Value::as_i64),
            };
        }

        match ChatMessage::deserialize(&value) {
            Ok(message) => Self::Message(message),
            Err(_) => Self::Other(value),
        }
    }

    pub fn is_keepalive(&self) -> bool {
        matches!(self, Self::Pong)
    }

    pub fn as_message(&self) -> Option<&ChatMessage> {
        match self {
            Self::Message(message) => Some(message),
            _ => None,
        }
    }
}

/// WebSocket close codes used by the chat transport
pub mod close_code {
    /// Normal closure, also used for client-initiated disconnects
    pub const NORMAL: u16 = 1000;
    /// Peer is going away (server restart, page navigation)
    pub const GOING_AWAY: u16 = 1001;
    /// Connection dropped without a close frame
    pub const ABNORMAL: u16 = 1006;
    /// Local close after the liveness timer expired
    pub const CONNECTION_TIMEOUT: u16 = 4000;

    /// Whether an unexpected close with this code should trigger a backoff reconnect
    pub fn should_reconnect(code: u16) -> bool {
        code != NORMAL && code != GOING_AWAY
    }
}
