//! Room directory.
//!
//! Maps room names to member sets and keeps a reverse index from each
//! connection to the rooms it belongs to, so a disconnecting client can be
//! removed from all of its rooms in one pass.
//!
//! Lock order is always reverse index first, rooms second.

use crate::connection::{ClientConnection, ConnectionId};
use crate::event::Event;
use crate::room::{Room, RoomHandle};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Named rooms and their members.
#[derive(Default)]
pub struct RoomDirectory {
    /// Rooms indexed by name. Empty rooms are removed.
    rooms: DashMap<String, Room>,
    /// Connection ID -> names of the rooms it is in.
    memberships: DashMap<ConnectionId, HashSet<String>>,
}

impl RoomDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `conn` to the named room, creating the room if needed.
    ///
    /// Joining twice has no additional effect. Closed connections are
    /// ignored so a join racing the connection's own disconnect cleanup
    /// cannot leave a stale member behind.
    pub fn join(&self, room_name: &str, conn: &ClientConnection) {
        if conn.is_closed() {
            return;
        }

        let mut joined = self.memberships.entry(conn.id().clone()).or_default();
        if conn.is_closed() {
            let empty = joined.is_empty();
            drop(joined);
            if empty {
                self.memberships.remove_if(conn.id(), |_, rooms| rooms.is_empty());
            }
            return;
        }

        if !joined.insert(room_name.to_string()) {
            trace!(room = %room_name, connection = %conn.id(), "Already in room");
            return;
        }

        let mut room = self.rooms.entry(room_name.to_string()).or_insert_with(|| {
            debug!(room = %room_name, "Creating room");
            Room::new(room_name)
        });
        room.insert(conn);
    }

    /// Remove `conn` from the named room.
    ///
    /// Unknown rooms and non-members are ignored. The room is deleted once
    /// its last member leaves.
    pub fn leave(&self, room_name: &str, conn: &ClientConnection) {
        let Some(mut joined) = self.memberships.get_mut(conn.id()) else {
            return;
        };
        if !joined.remove(room_name) {
            return;
        }
        let now_empty = joined.is_empty();

        self.remove_member(room_name, conn.id());

        drop(joined);
        if now_empty {
            self.memberships.remove_if(conn.id(), |_, rooms| rooms.is_empty());
        }
    }

    /// Remove a connection from every room it belongs to.
    ///
    /// Returns the names of the rooms it was removed from.
    pub fn remove_connection(&self, connection_id: &ConnectionId) -> Vec<String> {
        let Some((_, joined)) = self.memberships.remove(connection_id) else {
            return Vec::new();
        };

        for room_name in &joined {
            self.remove_member(room_name, connection_id);
        }

        debug!(
            connection = %connection_id,
            rooms = joined.len(),
            "Removed connection from all rooms"
        );
        joined.into_iter().collect()
    }

    fn remove_member(&self, room_name: &str, connection_id: &ConnectionId) {
        let now_empty = match self.rooms.get_mut(room_name) {
            Some(mut room) => {
                room.remove(connection_id.as_str());
                room.is_empty()
            }
            None => false,
        };

        if now_empty && self.rooms.remove_if(room_name, |_, room| room.is_empty()).is_some() {
            debug!(room = %room_name, "Deleted empty room");
        }
    }

    /// Snapshot of the members of a room. Empty for unknown rooms.
    #[must_use]
    pub fn members_of(&self, room_name: &str) -> Vec<ClientConnection> {
        self.rooms
            .get(room_name)
            .map(|room| room.members())
            .unwrap_or_default()
    }

    /// Number of members in a room.
    #[must_use]
    pub fn member_count(&self, room_name: &str) -> usize {
        self.rooms.get(room_name).map(|room| room.len()).unwrap_or(0)
    }

    /// Check if a connection is in a room.
    #[must_use]
    pub fn is_member(&self, room_name: &str, connection_id: &str) -> bool {
        self.rooms
            .get(room_name)
            .map(|room| room.contains(connection_id))
            .unwrap_or(false)
    }

    /// Names of the rooms containing `conn`.
    #[must_use]
    pub fn rooms_of(&self, conn: &ClientConnection) -> Vec<String> {
        self.memberships
            .get(conn.id())
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check if a room currently exists (has at least one member).
    #[must_use]
    pub fn room_exists(&self, room_name: &str) -> bool {
        self.rooms.contains_key(room_name)
    }

    /// Names of all non-empty rooms.
    #[must_use]
    pub fn room_names(&self) -> Vec<String> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// A handle bound to one room. Does not create the room.
    #[must_use]
    pub fn room(self: &Arc<Self>, room_name: &str) -> RoomHandle {
        RoomHandle::new(room_name, Arc::clone(self))
    }

    /// Queue an event on every member of a room.
    ///
    /// Returns the number of members that accepted it.
    pub fn broadcast(&self, room_name: &str, event: Event) -> usize {
        self.broadcast_inner(room_name, event, None)
    }

    /// Queue an event on every member of a room except one.
    pub fn broadcast_except(&self, room_name: &str, event: Event, excluded: &ConnectionId) -> usize {
        self.broadcast_inner(room_name, event, Some(excluded.as_str()))
    }

    fn broadcast_inner(&self, room_name: &str, event: Event, excluded: Option<&str>) -> usize {
        let event = Arc::new(event);
        match self.rooms.get(room_name) {
            Some(room) => room.broadcast(&event, excluded),
            None => {
                trace!(room = %room_name, "Broadcast to empty room");
                0
            }
        }
    }

    /// Directory statistics.
    #[must_use]
    pub fn stats(&self) -> DirectoryStats {
        DirectoryStats {
            room_count: self.rooms.len(),
            member_connections: self.memberships.len(),
            total_memberships: self.memberships.iter().map(|e| e.len()).sum(),
        }
    }
}

/// Room directory statistics.
#[derive(Debug, Clone)]
pub struct DirectoryStats {
    /// Number of non-empty rooms.
    pub room_count: usize,
    /// Number of connections in at least one room.
    pub member_connections: usize,
    /// Sum of room memberships over all connections.
    pub total_memberships: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use crate::handshake::QueryParams;
    use tokio::sync::mpsc;

    fn conn(
        directory: &Arc<RoomDirectory>,
        id: &str,
    ) -> (ClientConnection, mpsc::UnboundedReceiver<Outbound>) {
        ClientConnection::new(
            id.into(),
            QueryParams::default(),
            None,
            Arc::downgrade(directory),
        )
    }

    fn ids(members: Vec<ClientConnection>) -> Vec<String> {
        let mut ids: Vec<String> = members.iter().map(|c| c.id().to_string()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_join_is_idempotent() {
        let directory = Arc::new(RoomDirectory::new());
        let (c1, _rx) = conn(&directory, "conn-1");

        directory.join("One", &c1);
        directory.join("One", &c1);

        assert_eq!(directory.member_count("One"), 1);
        assert_eq!(directory.rooms_of(&c1), vec!["One".to_string()]);
    }

    #[test]
    fn test_leave_deletes_empty_room() {
        let directory = Arc::new(RoomDirectory::new());
        let (c1, _rx) = conn(&directory, "conn-1");

        directory.join("One", &c1);
        assert!(directory.room_exists("One"));

        directory.leave("One", &c1);
        assert!(!directory.room_exists("One"));
        assert!(directory.rooms_of(&c1).is_empty());
        assert_eq!(directory.stats().member_connections, 0);
    }

    #[test]
    fn test_leave_absent_is_noop() {
        let directory = Arc::new(RoomDirectory::new());
        let (c1, _rx) = conn(&directory, "conn-1");
        let (c2, _rx2) = conn(&directory, "conn-2");

        directory.leave("nowhere", &c1);
        directory.join("One", &c2);
        directory.leave("One", &c1);

        assert_eq!(ids(directory.members_of("One")), vec!["conn-2"]);
    }

    #[test]
    fn test_unknown_room_has_no_members() {
        let directory = RoomDirectory::new();
        assert!(directory.members_of("ghost").is_empty());
        assert_eq!(directory.broadcast("ghost", Event::new("e", Vec::new())), 0);
    }

    #[test]
    fn test_remove_connection_clears_every_room() {
        let directory = Arc::new(RoomDirectory::new());
        let (c1, _rx1) = conn(&directory, "conn-1");
        let (c2, _rx2) = conn(&directory, "conn-2");

        for room in ["a", "b", "c"] {
            directory.join(room, &c1);
        }
        directory.join("a", &c2);

        let mut removed = directory.remove_connection(c1.id());
        removed.sort();
        assert_eq!(removed, vec!["a", "b", "c"]);

        assert_eq!(ids(directory.members_of("a")), vec!["conn-2"]);
        assert!(!directory.room_exists("b"));
        assert!(!directory.room_exists("c"));
        assert!(directory.rooms_of(&c1).is_empty());
    }

    #[test]
    fn test_closed_connection_cannot_join() {
        let directory = Arc::new(RoomDirectory::new());
        let (c1, _rx) = conn(&directory, "conn-1");
        c1.mark_closed();

        directory.join("One", &c1);
        assert!(!directory.room_exists("One"));
        assert_eq!(directory.stats().member_connections, 0);
    }

    #[test]
    fn test_room_handle() {
        let directory = Arc::new(RoomDirectory::new());
        let (c1, mut rx1) = conn(&directory, "conn-1");
        let (c2, mut rx2) = conn(&directory, "conn-2");

        let room = directory.room("One");
        assert!(room.is_empty());
        assert!(!directory.room_exists("One"));

        room.join(&c1);
        c2.join_room("One");
        assert_eq!(room.len(), 2);
        assert_eq!(ids(room.clients()), vec!["conn-1", "conn-2"]);

        assert_eq!(room.send_event("news", b"x".to_vec()), 2);
        assert!(matches!(rx1.try_recv(), Ok(Outbound::Event(_))));
        assert!(matches!(rx2.try_recv(), Ok(Outbound::Event(_))));

        assert_eq!(room.send_event_except("news", b"y".to_vec(), &c1), 1);
        assert!(rx1.try_recv().is_err());
        assert!(matches!(rx2.try_recv(), Ok(Outbound::Event(_))));

        room.leave(&c1);
        assert_eq!(ids(room.clients()), vec!["conn-2"]);
    }

    #[test]
    fn test_stats() {
        let directory = Arc::new(RoomDirectory::new());
        let (c1, _rx1) = conn(&directory, "conn-1");
        let (c2, _rx2) = conn(&directory, "conn-2");

        directory.join("a", &c1);
        directory.join("b", &c1);
        directory.join("a", &c2);

        let stats = directory.stats();
        assert_eq!(stats.room_count, 2);
        assert_eq!(stats.member_connections, 2);
        assert_eq!(stats.total_memberships, 3);
    }
}
