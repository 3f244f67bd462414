//! WebSocket message envelopes.
//!
//! All traffic uses a `{type, payload}` JSON envelope; batch progress
//! payloads mirror the HTTP snapshot fields.

use serde::{Deserialize, Serialize};

/// Server -> client message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub payload: serde_json::Value,
}

impl ServerMessage {
    pub fn new(msg_type: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            msg_types::ERROR,
            serde_json::json!({
                "code": code.into(),
                "message": message.into(),
            }),
        )
    }
}

/// Client -> server message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ClientMessage {
    pub fn queue_id(&self) -> Option<&str> {
        self.payload.get("queue_id").and_then(|v| v.as_str())
    }
}

/// Reserved message type constants.
pub mod msg_types {
    // Server -> client.
    pub const CONNECTED: &str = "connected";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
    pub const JOINED_QUEUE: &str = "joined_queue";
    pub const LEFT_QUEUE: &str = "left_queue";
    pub const QUEUE_STATUS: &str = "queue_status";
    pub const ACTIVE_QUEUES: &str = "active_queues";
    pub const BATCH_PROGRESS: &str = "batch_progress";

    // Client -> server.
    pub const PING: &str = "ping";
    pub const JOIN_QUEUE: &str = "join_queue";
    pub const LEAVE_QUEUE: &str = "leave_queue";
    pub const REQUEST_PROGRESS: &str = "request_progress";
    pub const CANCEL_BATCH: &str = "cancel_batch";
    pub const GET_QUEUE_STATUS: &str = "get_queue_status";
    pub const GET_ACTIVE_QUEUES: &str = "get_active_queues";
}
