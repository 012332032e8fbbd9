//! Events exchanged with clients.

use crate::connection::ConnectionId;
use bytes::Bytes;

/// A named event with an opaque payload.
///
/// Outbound events are wrapped in an `Arc` once and shared by every
/// recipient of a broadcast.
#[derive(Debug, Clone)]
pub struct Event {
    /// Event name.
    pub name: String,
    /// Opaque payload.
    pub payload: Bytes,
    /// Connection that sent the event, for inbound events.
    pub source: Option<ConnectionId>,
}

impl Event {
    /// Create a new event.
    #[must_use]
    pub fn new(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            source: None,
        }
    }

    /// Set the connection the event came from.
    #[must_use]
    pub fn with_source(mut self, source: ConnectionId) -> Self {
        self.source = Some(source);
        self
    }

    /// Get the payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Get the payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}
