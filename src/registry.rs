//! Connection registry
//!
//! Sole owner of every live [`Connection`].

use std::collections::HashMap;

use tracing::debug;

use crate::connection::Connection;
use crate::error::RelayError;
use crate::room::RoomDirectory;
use crate::types::ConnectionId;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// All live connections: ConnectionId -> Connection
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted connection
    ///
    /// Fails with `DuplicateConnection` if the id is already live; the
    /// existing entry is left untouched.
    pub fn register(&mut self, conn: Connection) -> Result<ConnectionId, RelayError> {
        let id = conn.id;
        if self.connections.contains_key(&id) {
            return Err(RelayError::DuplicateConnection(id));
        }
        self.connections.insert(id, conn);
        Ok(id)
    }

    /// Remove a connection, releasing its room membership first
    ///
    /// Returns the closed connection, or None if it was not registered.
    pub fn unregister(
        &mut self,
        id: ConnectionId,
        directory: &mut RoomDirectory,
    ) -> Option<Connection> {
        let mut conn = self.connections.remove(&id)?;

        if let Some(room) = directory.leave(id) {
            debug!("Connection {} released from room {}", id, room);
        }
        conn.close();

        Some(conn)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }
}
