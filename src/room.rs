//! Room directory
//!
//! Maps room names to member sets. Rooms are created by the first join that
//! names them and removed as soon as their last member leaves.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::debug;

use crate::delivery::DeliveryEngine;
use crate::message::Frame;
use crate::registry::ConnectionRegistry;
use crate::types::{ConnectionId, RoomName};

/// A named group of connections
#[derive(Debug)]
pub struct Room {
    /// Room name
    pub name: RoomName,
    /// Room creation time
    pub created_at: Instant,
    members: HashSet<ConnectionId>,
}

impl Room {
    /// Create an empty room
    pub fn new(name: RoomName) -> Self {
        Self {
            name,
            created_at: Instant::now(),
            members: HashSet::new(),
        }
    }

    /// Check if a connection is in this room
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.members.iter().copied()
    }
}

/// Outcome of a join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Room the connection was moved out of
    pub previous: Option<RoomName>,
    /// Whether the joined room was created by this join
    pub created: bool,
}

/// Outcome of a broadcast
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients whose queue accepted the frame
    pub delivered: usize,
    /// Recipients that must be torn down (send failure or overflow)
    pub faulted: Vec<ConnectionId>,
}

/// All active rooms
///
/// Invariant: a room is present iff it has at least one member, and each
/// connection is in at most one room.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    /// All active rooms: RoomName -> Room
    rooms: HashMap<RoomName, Room>,
    /// Connection to room mapping for fast lookup
    memberships: HashMap<ConnectionId, RoomName>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a connection into `room`, leaving its previous room first
    pub fn join(&mut self, id: ConnectionId, room: RoomName) -> JoinOutcome {
        if self.memberships.get(&id) == Some(&room) {
            return JoinOutcome {
                previous: None,
                created: false,
            };
        }
        let previous = self.leave(id);

        let created = !self.rooms.contains_key(&room);
        self.rooms
            .entry(room.clone())
            .or_insert_with(|| Room::new(room.clone()))
            .members
            .insert(id);
        self.memberships.insert(id, room.clone());

        if created {
            debug!("Room {} created", room);
        }

        JoinOutcome { previous, created }
    }

    /// Remove a connection from its room, deleting the room if it empties
    ///
    /// Returns the room that was left.
    pub fn leave(&mut self, id: ConnectionId) -> Option<RoomName> {
        let name = self.memberships.remove(&id)?;

        if let Some(room) = self.rooms.get_mut(&name) {
            room.members.remove(&id);
            if room.is_empty() {
                self.rooms.remove(&name);
                debug!("Room {} deleted (empty)", name);
            }
        }

        Some(name)
    }

    /// Deliver `frame` to every member of `room` except `sender`
    ///
    /// A room nobody has joined is a silent no-op with zero recipients.
    pub fn broadcast(
        &self,
        room: &RoomName,
        sender: ConnectionId,
        frame: &Frame,
        registry: &ConnectionRegistry,
        delivery: &DeliveryEngine,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let Some(room) = self.rooms.get(room) else {
            return report;
        };

        for member in room.members().filter(|member| *member != sender) {
            let Some(conn) = registry.get(member) else {
                report.faulted.push(member);
                continue;
            };
            match delivery.enqueue(conn, frame.clone()) {
                Ok(admission) if admission.accepted() => report.delivered += 1,
                Ok(_) => {}
                Err(e) => {
                    debug!("Delivery to {} failed: {}", member, e);
                    report.faulted.push(member);
                }
            }
        }

        report
    }

    pub fn get(&self, room: &RoomName) -> Option<&Room> {
        self.rooms.get(room)
    }

    /// Room a connection currently belongs to
    pub fn room_of(&self, id: ConnectionId) -> Option<&RoomName> {
        self.memberships.get(&id)
    }

    pub fn contains(&self, room: &RoomName) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Drop every room and membership
    pub fn clear(&mut self) {
        self.rooms.clear();
        self.memberships.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> RoomName {
        RoomName::parse(s).unwrap()
    }

    #[test]
    fn test_first_join_creates_room() {
        let mut dir = RoomDirectory::new();
        let a = ConnectionId::new();

        let outcome = dir.join(a, name("lobby"));

        assert!(outcome.created);
        assert_eq!(outcome.previous, None);
        assert!(dir.get(&name("lobby")).unwrap().contains(a));
        assert_eq!(dir.room_of(a), Some(&name("lobby")));
    }

    #[test]
    fn test_second_join_reuses_room() {
        let mut dir = RoomDirectory::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        dir.join(a, name("lobby"));
        let outcome = dir.join(b, name("lobby"));

        assert!(!outcome.created);
        assert_eq!(dir.get(&name("lobby")).unwrap().member_count(), 2);
        assert_eq!(dir.room_count(), 1);
    }

    #[test]
    fn test_join_replaces_membership() {
        let mut dir = RoomDirectory::new();
        let a = ConnectionId::new();

        dir.join(a, name("r1"));
        let outcome = dir.join(a, name("r2"));

        assert_eq!(outcome.previous, Some(name("r1")));
        assert!(!dir.contains(&name("r1")));
        assert!(dir.get(&name("r2")).unwrap().contains(a));
    }

    #[test]
    fn test_rejoin_same_room_is_noop() {
        let mut dir = RoomDirectory::new();
        let a = ConnectionId::new();

        dir.join(a, name("r1"));
        let outcome = dir.join(a, name("r1"));

        assert_eq!(outcome.previous, None);
        assert!(!outcome.created);
        assert_eq!(dir.get(&name("r1")).unwrap().member_count(), 1);
    }

    #[test]
    fn test_leave_deletes_empty_room() {
        let mut dir = RoomDirectory::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        dir.join(a, name("lobby"));
        dir.join(b, name("lobby"));

        assert_eq!(dir.leave(a), Some(name("lobby")));
        assert!(dir.contains(&name("lobby")));

        assert_eq!(dir.leave(b), Some(name("lobby")));
        assert!(!dir.contains(&name("lobby")));
        assert_eq!(dir.room_count(), 0);
    }

    #[test]
    fn test_leave_without_room() {
        let mut dir = RoomDirectory::new();
        assert_eq!(dir.leave(ConnectionId::new()), None);
    }

    #[test]
    fn test_single_membership_over_sequences() {
        let mut dir = RoomDirectory::new();
        let ids: Vec<ConnectionId> = (0..4).map(|_| ConnectionId::new()).collect();
        let rooms = ["a", "b", "c"];

        for step in 0..60usize {
            let id = ids[step % ids.len()];
            if step % 5 == 0 {
                dir.leave(id);
            } else {
                dir.join(id, name(rooms[(step * 7) % rooms.len()]));
            }

            for id in &ids {
                let count = dir.rooms.values().filter(|room| room.contains(*id)).count();
                assert!(count <= 1);
            }
            for room in dir.rooms.values() {
                assert!(!room.is_empty());
            }
        }
    }
}
