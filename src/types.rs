//! Basic type definitions for the relay
//!
//! Provides newtype wrappers for type safety:
//! - `ConnectionId`: UUID-based unique connection identifier
//! - `RoomName`: validated, opaque room key

use std::fmt;

use uuid::Uuid;

use crate::error::RelayError;

/// Longest accepted room name, in bytes
pub const MAX_ROOM_NAME_LEN: usize = 256;

/// Unique connection identifier (newtype pattern)
///
/// Wraps a UUID v4. Implements Hash and Eq for use as HashMap keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room name
///
/// Arbitrary text chosen by clients. Case-sensitive and never normalized;
/// the only requirement is that it is non-blank, bounded and printable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomName(String);

impl RoomName {
    /// Validate a client-supplied name
    pub fn parse(name: impl Into<String>) -> Result<Self, RelayError> {
        let name = name.into();

        if name.trim().is_empty() {
            return Err(RelayError::InvalidRoomName(name));
        }
        if name.len() > MAX_ROOM_NAME_LEN || name.chars().any(char::is_control) {
            return Err(RelayError::InvalidRoomName(name));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
