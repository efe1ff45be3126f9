//! Error types for the relay
//!
//! Every error is scoped to a single connection. Uses thiserror for
//! ergonomic error definitions.

use thiserror::Error;

use crate::delivery::OverflowPolicy;
use crate::types::ConnectionId;

/// Relay errors
///
/// Covers both connection-fatal errors (the connection is torn down) and
/// event-scoped errors (the single event is rejected, the connection lives on).
#[derive(Debug, Error)]
pub enum RelayError {
    /// Empty or malformed room name in a join/message event
    #[error("Invalid room name: {0:?}")]
    InvalidRoomName(String),

    /// Connection id registered twice while still live
    #[error("Duplicate connection: {0}")]
    DuplicateConnection(ConnectionId),

    /// Event for a connection that has already been torn down
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The connection's writer is gone (fatal for that connection)
    #[error("Transport send failure for {0}")]
    TransportSendFailure(ConnectionId),

    /// The connection's outbound queue is full
    #[error("Outbound queue overflow for {id} (policy {policy})")]
    QueueOverflow {
        id: ConnectionId,
        policy: OverflowPolicy,
    },

    /// Inbound text that is not a valid event (fatal for that connection)
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - relay actor gone)
    #[error("Channel send error")]
    ChannelSend,
}

impl RelayError {
    /// Whether the connection that hit this error must be torn down
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(
            self,
            RelayError::InvalidRoomName(_)
                | RelayError::UnknownConnection(_)
                | RelayError::DuplicateConnection(_)
        )
    }
}
