//! Message router
//!
//! Validates inbound events and applies them to the registry and the room
//! directory. Everything here is synchronous: the only caller is the relay
//! actor, which serializes all mutations.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionState};
use crate::delivery::DeliveryEngine;
use crate::error::RelayError;
use crate::message::{summarize, ClientEvent, Frame, ServerEvent};
use crate::registry::ConnectionRegistry;
use crate::room::{JoinOutcome, RoomDirectory};
use crate::types::{ConnectionId, RoomName};

/// Connection and room state plus the delivery policy
#[derive(Debug, Default)]
pub struct Router {
    registry: ConnectionRegistry,
    directory: RoomDirectory,
    delivery: DeliveryEngine,
}

impl Router {
    pub fn new(delivery: DeliveryEngine) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            directory: RoomDirectory::new(),
            delivery,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    pub fn delivery(&self) -> &DeliveryEngine {
        &self.delivery
    }

    /// Where a connection is in its lifecycle
    ///
    /// Derived from the registry (live or not) and the directory (which room).
    pub fn state(&self, id: ConnectionId) -> ConnectionState {
        if !self.registry.contains(id) {
            return ConnectionState::Disconnected;
        }
        match self.directory.room_of(id) {
            Some(room) => ConnectionState::Joined(room.clone()),
            None => ConnectionState::Connected,
        }
    }

    /// Register an accepted connection
    pub fn connect(&mut self, conn: Connection) -> Result<ConnectionId, RelayError> {
        let id = self.registry.register(conn)?;
        info!("Connection {} registered", id);
        debug!(
            "Total connections: {}, Total rooms: {}",
            self.registry.len(),
            self.directory.room_count()
        );
        Ok(id)
    }

    /// Dispatch one inbound event
    pub fn handle_event(&mut self, id: ConnectionId, event: ClientEvent) -> Result<(), RelayError> {
        match event {
            ClientEvent::Join { room } => self.join(id, &room).map(drop),
            ClientEvent::Leave => self.leave(id).map(drop),
            ClientEvent::Message { room, payload } => self.message(id, &room, payload).map(drop),
        }
    }

    /// Move a connection into a room, replacing any current membership
    pub fn join(&mut self, id: ConnectionId, room: &str) -> Result<JoinOutcome, RelayError> {
        let room = RoomName::parse(room)?;
        if !self.registry.contains(id) {
            return Err(RelayError::UnknownConnection(id));
        }

        let outcome = self.directory.join(id, room.clone());

        match &outcome.previous {
            Some(previous) => info!("Connection {} moved from room {} to {}", id, previous, room),
            None => info!("Connection {} joined room {}", id, room),
        }
        Ok(outcome)
    }

    /// Take a connection out of its room
    ///
    /// Leaving without being in a room is a no-op.
    pub fn leave(&mut self, id: ConnectionId) -> Result<Option<RoomName>, RelayError> {
        if !self.registry.contains(id) {
            return Err(RelayError::UnknownConnection(id));
        }

        let left = self.directory.leave(id);
        if let Some(room) = &left {
            info!("Connection {} left room {}", id, room);
        }
        Ok(left)
    }

    /// Relay a payload to every member of `room` except the sender
    ///
    /// The sender does not need to be a member of `room`. Returns the number
    /// of recipients; a room nobody has joined yields zero.
    pub fn message(
        &mut self,
        id: ConnectionId,
        room: &str,
        payload: Value,
    ) -> Result<usize, RelayError> {
        let room = RoomName::parse(room)?;
        if !self.registry.contains(id) {
            return Err(RelayError::UnknownConnection(id));
        }

        info!(room = %room, payload = %summarize(&payload), "Relaying message from {}", id);

        let frame = Frame::encode(&ServerEvent::Message {
            room: room.to_string(),
            payload,
        })?;
        let report = self
            .directory
            .broadcast(&room, id, &frame, &self.registry, &self.delivery);

        for faulted in report.faulted {
            warn!("Dropping connection {} after failed delivery", faulted);
            self.disconnect(faulted);
        }

        Ok(report.delivered)
    }

    /// Report a rejected event back to its connection, best effort
    ///
    /// Connection-fatal errors tear the connection down instead.
    pub fn reject(&mut self, id: ConnectionId, err: &RelayError) {
        if err.is_connection_fatal() {
            warn!("Connection {} faulted: {}", id, err);
            self.disconnect(id);
            return;
        }
        if matches!(err, RelayError::UnknownConnection(_)) {
            debug!("Ignoring event for {}: {}", id, err);
            return;
        }

        warn!("Rejected event from {}: {}", id, err);
        let Some(conn) = self.registry.get(id) else {
            return;
        };
        let Ok(frame) = Frame::encode(&ServerEvent::from(err)) else {
            return;
        };
        if let Err(e) = self.delivery.enqueue(conn, frame) {
            warn!("Dropping connection {}: {}", id, e);
            self.disconnect(id);
        }
    }

    /// Tear a connection down, releasing its room
    ///
    /// Returns false if it was already gone.
    pub fn disconnect(&mut self, id: ConnectionId) -> bool {
        let Some(conn) = self.registry.unregister(id, &mut self.directory) else {
            return false;
        };

        info!(
            "Connection {} disconnected after {:?}",
            id,
            conn.connected_at.elapsed()
        );
        debug!(
            "Total connections: {}, Total rooms: {}",
            self.registry.len(),
            self.directory.room_count()
        );
        true
    }

    /// Close every connection and clear the directory
    ///
    /// Returns how many connections were closed.
    pub fn shutdown(&mut self) -> usize {
        let ids = self.registry.ids();
        for id in &ids {
            self.registry.unregister(*id, &mut self.directory);
        }
        self.directory.clear();
        ids.len()
    }
}
