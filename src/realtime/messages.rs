//! Real-time wire messages.
//!
//! Frames are JSON objects tagged by `type`:
//!
//! ```text
//! client → server: {"type":"message","body":"..."} | {"type":"ping"} | {"type":"members"}
//! server → client: welcome, message, presence, members, ack, pong, error, superseded
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Chat message for everyone else in the room.
    Message { body: String },
    Ping,
    /// Ask for the identities currently present.
    Members,
}

impl ClientMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceEvent {
    Joined,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        connection_id: u64,
        identity_id: String,
        room_id: String,
        members: Vec<String>,
    },
    Message {
        from: String,
        room_id: String,
        body: String,
        sent_at: u64,
    },
    Presence {
        identity_id: String,
        event: PresenceEvent,
    },
    Members {
        room_id: String,
        identities: Vec<String>,
    },
    /// Confirms a chat message and how many members it reached.
    Ack { delivered: usize },
    Pong,
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after: Option<u64>,
    },
    /// Another connection for the same identity took over.
    Superseded,
}

impl ServerMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing these types cannot fail: no maps with non-string keys.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"type\":\"error\"}"))
    }
}
