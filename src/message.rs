//! Wire protocol definitions
//!
//! JSON text frames using Serde's internally tagged enums (`"event"` tag)
//! for type-safe serialization/deserialization.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;

/// Longest payload summary written to the logs
const SUMMARY_LEN: usize = 120;

/// Client → Relay event
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Join a room, replacing any current membership
    Join { room: String },
    /// Leave the current room
    Leave,
    /// Relay a payload to every other member of a room
    Message { room: String, payload: Value },
}

/// Relay → Client event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection accepted, id issued
    Connected { id: String },
    /// Payload relayed from another connection
    Message { room: String, payload: Value },
    /// A single event was rejected
    Error { code: ErrorCode, message: String },
}

/// Error codes for ServerEvent::Error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Blank or malformed room name
    InvalidRoomName,
    /// Invalid message format
    InvalidMessage,
    /// Anything else
    Internal,
}

impl From<&RelayError> for ServerEvent {
    fn from(err: &RelayError) -> Self {
        let (code, message) = match err {
            RelayError::InvalidRoomName(name) => (
                ErrorCode::InvalidRoomName,
                format!("Invalid room name {:?}", name),
            ),
            RelayError::MalformedFrame(reason) => {
                (ErrorCode::InvalidMessage, format!("Invalid message: {}", reason))
            }
            RelayError::Json(e) => (
                ErrorCode::InvalidMessage,
                format!("Invalid message format: {}", e),
            ),
            _ => (ErrorCode::Internal, "Internal error".to_string()),
        };
        ServerEvent::Error { code, message }
    }
}

/// An outbound frame, serialized once and shared by every recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Arc<str>);

impl Frame {
    /// Serialize an event into a frame
    pub fn encode(event: &ServerEvent) -> Result<Self, RelayError> {
        let json = serde_json::to_string(event)?;
        Ok(Self(Arc::from(json)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Parse an inbound text frame
pub fn decode_client_event(text: &str) -> Result<ClientEvent, RelayError> {
    serde_json::from_str(text).map_err(|e| RelayError::MalformedFrame(e.to_string()))
}

/// Short single-line rendering of a payload for logs
pub fn summarize(payload: &Value) -> String {
    let mut text = payload.to_string();
    if text.len() > SUMMARY_LEN {
        let mut cut = SUMMARY_LEN;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push('…');
    }
    text
}
