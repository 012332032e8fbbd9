//! Client connection handles.
//!
//! A [`ClientConnection`] is the server-side identity of one live client
//! session. Handles are cheap to clone; every clone refers to the same
//! session. Sending through a handle only queues the event for the
//! connection's writer task and never waits for delivery.

use crate::directory::RoomDirectory;
use crate::event::Event;
use crate::handshake::{HandshakeParams, QueryParams};
use crate::room::RoomHandle;
use bytes::Bytes;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::trace;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    ///
    /// IDs come from a process-wide counter, so no two calls in the same
    /// process return the same value.
    #[must_use]
    pub fn generate() -> Self {
        let n = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{n:x}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::borrow::Borrow<str> for ConnectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Work queued for a connection's writer.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Deliver an event to the client.
    Event(Arc<Event>),
    /// Close the connection.
    Close,
}

/// Dispatch phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Phase {
    Accepted = 0,
    Connected = 1,
    Disconnected = 2,
}

struct Inner {
    id: ConnectionId,
    query: QueryParams,
    remote_addr: Option<SocketAddr>,
    sender: mpsc::UnboundedSender<Outbound>,
    rooms: Weak<RoomDirectory>,
    closed: AtomicBool,
    phase: AtomicU8,
}

/// Handle for one live client connection.
#[derive(Clone)]
pub struct ClientConnection {
    inner: Arc<Inner>,
}

impl ClientConnection {
    /// Create a connection handle.
    ///
    /// Returns the handle and the receiving end of its outbound queue, which
    /// the transport drains and writes to the socket. `rooms` is the
    /// directory that [`join_room`](Self::join_room) and
    /// [`leave_room`](Self::leave_room) operate on.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        query: QueryParams,
        remote_addr: Option<SocketAddr>,
        rooms: Weak<RoomDirectory>,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let conn = Self {
            inner: Arc::new(Inner {
                id,
                query,
                remote_addr,
                sender,
                rooms,
                closed: AtomicBool::new(false),
                phase: AtomicU8::new(Phase::Accepted as u8),
            }),
        };
        (conn, receiver)
    }

    /// Get the connection's unique identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.inner.id
    }

    /// Raw handshake query parameters, in the order the client sent them.
    #[must_use]
    pub fn query(&self) -> &QueryParams {
        &self.inner.query
    }

    /// Folded handshake parameters.
    ///
    /// The connect callback already receives this value; this recomputes it
    /// for code that needs it later.
    #[must_use]
    pub fn handshake_params(&self) -> HandshakeParams {
        self.inner.query.fold()
    }

    /// Remote address of the client, if known.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// Queue an event for this client.
    ///
    /// Returns `false` if the connection is closed.
    pub fn send_event(&self, name: impl Into<String>, payload: impl Into<Bytes>) -> bool {
        self.send(Arc::new(Event::new(name, payload)))
    }

    /// Queue a shared event for this client.
    ///
    /// Returns `false` if the connection is closed.
    pub fn send(&self, event: Arc<Event>) -> bool {
        if self.is_closed() {
            return false;
        }
        trace!(connection = %self.inner.id, event = %event.name, "Queueing event");
        self.inner.sender.send(Outbound::Event(event)).is_ok()
    }

    /// Ask the transport to close this connection.
    ///
    /// The disconnect callback fires once the transport has torn the
    /// connection down.
    pub fn disconnect(&self) {
        let _ = self.inner.sender.send(Outbound::Close);
    }

    /// Mark the connection closed.
    ///
    /// After this, sends are dropped and room joins are ignored. Returns
    /// `true` if this call closed it.
    pub fn mark_closed(&self) -> bool {
        !self.inner.closed.swap(true, Ordering::SeqCst)
    }

    /// Check if the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst) || self.inner.sender.is_closed()
    }

    /// Join the named room.
    pub fn join_room(&self, room_name: &str) {
        if let Some(rooms) = self.inner.rooms.upgrade() {
            rooms.join(room_name, self);
        }
    }

    /// Leave the named room.
    pub fn leave_room(&self, room_name: &str) {
        if let Some(rooms) = self.inner.rooms.upgrade() {
            rooms.leave(room_name, self);
        }
    }

    /// A handle to the named room in this connection's directory.
    ///
    /// `None` once the directory has been dropped.
    #[must_use]
    pub fn room(&self, room_name: &str) -> Option<RoomHandle> {
        self.inner.rooms.upgrade().map(|rooms| rooms.room(room_name))
    }

    /// Names of the rooms this connection belongs to.
    #[must_use]
    pub fn rooms(&self) -> Vec<String> {
        self.inner
            .rooms
            .upgrade()
            .map(|rooms| rooms.rooms_of(self))
            .unwrap_or_default()
    }

    /// Atomically move from `from` to `to`. Returns `false` if the
    /// connection was not in `from`.
    pub(crate) fn advance_phase(&self, from: Phase, to: Phase) -> bool {
        self.inner
            .phase
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.inner.phase.load(Ordering::SeqCst) == Phase::Connected as u8
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PartialEq for ClientConnection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ClientConnection {}

impl Hash for ClientConnection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached(id: &str) -> (ClientConnection, mpsc::UnboundedReceiver<Outbound>) {
        ClientConnection::new(id.into(), QueryParams::default(), None, Weak::new())
    }

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_send_event_is_queued() {
        let (conn, mut rx) = detached("conn-1");
        assert!(conn.send_event("greet", b"hi".to_vec()));

        match rx.try_recv() {
            Ok(Outbound::Event(event)) => {
                assert_eq!(event.name, "greet");
                assert_eq!(&event.payload[..], b"hi");
            }
            other => panic!("expected queued event, got {other:?}"),
        }
    }

    #[test]
    fn test_send_after_close_is_dropped() {
        let (conn, mut rx) = detached("conn-1");
        assert!(conn.mark_closed());
        assert!(!conn.mark_closed());
        assert!(!conn.send_event("greet", Bytes::new()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (conn, rx) = detached("conn-1");
        drop(rx);
        assert!(conn.is_closed());
        assert!(!conn.send_event("greet", Bytes::new()));
    }

    #[test]
    fn test_disconnect_queues_close() {
        let (conn, mut rx) = detached("conn-1");
        conn.disconnect();
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
    }

    #[test]
    fn test_clones_share_identity() {
        let (conn, _rx) = detached("conn-1");
        let clone = conn.clone();
        assert_eq!(conn, clone);
        clone.mark_closed();
        assert!(conn.is_closed());
    }

    #[test]
    fn test_room_ops_without_directory_are_noops() {
        let (conn, _rx) = detached("conn-1");
        conn.join_room("lobby");
        assert!(conn.rooms().is_empty());
        conn.leave_room("lobby");
        assert!(conn.room("lobby").is_none());
    }

    #[test]
    fn test_room_handle_through_connection() {
        let directory = Arc::new(RoomDirectory::new());
        let (a, _rx_a) =
            ClientConnection::new("a".into(), QueryParams::default(), None, Arc::downgrade(&directory));
        let (b, mut rx_b) =
            ClientConnection::new("b".into(), QueryParams::default(), None, Arc::downgrade(&directory));
        a.join_room("lobby");
        b.join_room("lobby");

        let room = a.room("lobby").unwrap();
        assert_eq!(room.len(), 2);
        assert_eq!(room.send_event_except("chat", b"hi".to_vec(), &a), 1);
        assert!(matches!(rx_b.try_recv(), Ok(Outbound::Event(e)) if e.name == "chat"));
    }
}
