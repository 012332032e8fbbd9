//! Rooms.
//!
//! A room is a named set of connections used to scope broadcasts. Rooms
//! live inside a [`RoomDirectory`]; application code reaches one through a
//! [`RoomHandle`].

use crate::connection::{ClientConnection, ConnectionId};
use crate::directory::RoomDirectory;
use crate::event::Event;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// A named set of connections.
#[derive(Debug)]
pub struct Room {
    name: String,
    members: HashMap<ConnectionId, ClientConnection>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: HashMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn contains(&self, connection_id: &str) -> bool {
        self.members.contains_key(connection_id)
    }

    /// Add a member. Returns `true` if it was not already present.
    pub fn insert(&mut self, conn: &ClientConnection) -> bool {
        if self.members.contains_key(conn.id()) {
            return false;
        }
        self.members.insert(conn.id().clone(), conn.clone());
        debug!(room = %self.name, connection = %conn.id(), "Connection joined room");
        true
    }

    /// Remove a member. Returns `true` if it was present.
    pub fn remove(&mut self, connection_id: &str) -> bool {
        let removed = self.members.remove(connection_id).is_some();
        if removed {
            debug!(room = %self.name, connection = %connection_id, "Connection left room");
        }
        removed
    }

    /// Snapshot of the members.
    #[must_use]
    pub fn members(&self) -> Vec<ClientConnection> {
        self.members.values().cloned().collect()
    }

    /// Queue an event on every member except `excluded`.
    ///
    /// Returns the number of members that accepted it.
    pub fn broadcast(&self, event: &Arc<Event>, excluded: Option<&str>) -> usize {
        let count = self
            .members
            .iter()
            .filter(|(id, _)| excluded != Some(id.as_str()))
            .filter(|(_, conn)| conn.send(Arc::clone(event)))
            .count();
        trace!(room = %self.name, event = %event.name, recipients = count, "Room broadcast");
        count
    }
}

/// Capability handle scoped to one room.
///
/// Obtaining a handle never creates the room; operations on a room nobody
/// has joined see no members.
#[derive(Clone)]
pub struct RoomHandle {
    name: String,
    directory: Arc<RoomDirectory>,
}

impl RoomHandle {
    pub(crate) fn new(name: impl Into<String>, directory: Arc<RoomDirectory>) -> Self {
        Self {
            name: name.into(),
            directory,
        }
    }

    /// The room name this handle is bound to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current members of the room.
    #[must_use]
    pub fn clients(&self) -> Vec<ClientConnection> {
        self.directory.members_of(&self.name)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.directory.member_count(&self.name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a connection to the room.
    pub fn join(&self, conn: &ClientConnection) {
        self.directory.join(&self.name, conn);
    }

    /// Remove a connection from the room.
    pub fn leave(&self, conn: &ClientConnection) {
        self.directory.leave(&self.name, conn);
    }

    /// Send an event to every member.
    ///
    /// Returns the number of members that accepted it.
    pub fn send_event(&self, name: impl Into<String>, payload: impl Into<Bytes>) -> usize {
        self.directory.broadcast(&self.name, Event::new(name, payload))
    }

    /// Send an event to every member except `excluded`.
    pub fn send_event_except(
        &self,
        name: impl Into<String>,
        payload: impl Into<Bytes>,
        excluded: &ClientConnection,
    ) -> usize {
        self.directory
            .broadcast_except(&self.name, Event::new(name, payload), excluded.id())
    }
}

impl std::fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomHandle").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use crate::handshake::QueryParams;
    use std::sync::Weak;

    #[test]
    fn test_room_insert_remove() {
        let mut room = Room::new("lobby");
        let (conn, _rx) =
            ClientConnection::new("conn-1".into(), QueryParams::default(), None, Weak::new());

        assert!(room.insert(&conn));
        assert!(!room.insert(&conn));
        assert_eq!(room.len(), 1);
        assert!(room.contains("conn-1"));

        assert!(room.remove("conn-1"));
        assert!(!room.remove("conn-1"));
        assert!(room.is_empty());
    }

    #[test]
    fn test_room_broadcast_excludes_sender() {
        let mut room = Room::new("lobby");
        let (c1, mut rx1) =
            ClientConnection::new("conn-1".into(), QueryParams::default(), None, Weak::new());
        let (c2, mut rx2) =
            ClientConnection::new("conn-2".into(), QueryParams::default(), None, Weak::new());
        room.insert(&c1);
        room.insert(&c2);

        let event = Arc::new(Event::new("chat", b"hi".to_vec()));
        assert_eq!(room.broadcast(&event, Some("conn-1")), 1);
        assert!(rx1.try_recv().is_err());
        assert!(matches!(rx2.try_recv(), Ok(Outbound::Event(_))));
    }
}
