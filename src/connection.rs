//! Connection struct definition
//!
//! Represents a live connection and its outbound queue. Room membership is
//! not stored here; the room directory is the only record of it.

use std::time::Instant;

use crate::delivery::Outbox;
use crate::types::{ConnectionId, RoomName};

/// Per-connection state machine
///
/// `Connected -> Joined -> Connected (leave) / Joined (rejoin) -> Disconnected`.
/// `Disconnected` is terminal. See [`crate::Router::state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, not in any room
    Connected,
    /// Member of exactly one room
    Joined(RoomName),
    /// Torn down
    Disconnected,
}

/// Live connection information
///
/// Owned by the registry. Rooms refer to it by id only.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ConnectionId,
    /// Registration time
    pub connected_at: Instant,
    outbox: Outbox,
}

impl Connection {
    /// Create a new connection with the given ID and outbound queue
    pub fn new(id: ConnectionId, outbox: Outbox) -> Self {
        Self {
            id,
            connected_at: Instant::now(),
            outbox,
        }
    }

    /// Liveness flag: not torn down and the writer is still attached
    pub fn is_live(&self) -> bool {
        !self.outbox.is_closed()
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Close the outbound queue; the connection is dead from here on
    pub(crate) fn close(&mut self) {
        self.outbox.close();
    }
}
