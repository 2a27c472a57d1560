//! Named broadcast scopes.
//!
//! A room is a set of connections that opted in to a subset of events.
//! Membership is connection-local and disappears with the connection.

use crate::connection::ConnectionId;
use std::collections::HashSet;
use tracing::debug;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// Feed room receiving progress events for every shipment.
pub const SHIPMENTS_ROOM: &str = "shipments";

/// Room receiving progress events for a single shipment.
#[must_use]
pub fn shipment_room(shipment_id: &str) -> String {
    format!("shipment:{shipment_id}")
}

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if name.starts_with('$') {
        return Err("Room names starting with '$' are reserved");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room name contains invalid characters");
    }
    Ok(())
}

/// A room and its members.
#[derive(Debug)]
pub struct Room {
    name: String,
    members: HashSet<ConnectionId>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: HashSet::new(),
        }
    }

    /// Get the room name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a member. Returns `true` if it was not already present.
    pub fn join(&mut self, connection_id: &ConnectionId) -> bool {
        let added = self.members.insert(connection_id.clone());
        if added {
            debug!(room = %self.name, connection = %connection_id, "Joined room");
        }
        added
    }

    /// Remove a member. Returns `true` if it was present.
    pub fn leave(&mut self, connection_id: &str) -> bool {
        let removed = self.members.remove(connection_id);
        if removed {
            debug!(room = %self.name, connection = %connection_id, "Left room");
        }
        removed
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn is_member(&self, connection_id: &str) -> bool {
        self.members.contains(connection_id)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Snapshot of the member ids.
    #[must_use]
    pub fn members(&self) -> Vec<ConnectionId> {
        self.members.iter().cloned().collect()
    }
}
