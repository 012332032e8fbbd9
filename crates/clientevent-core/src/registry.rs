//! Registry of live connections.

use crate::connection::{ClientConnection, ConnectionId};
use crate::event::Event;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A connection with the same identifier is already registered.
    #[error("Duplicate connection identifier: {0}")]
    DuplicateIdentifier(ConnectionId),
}

/// Every currently connected client, keyed by connection ID.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ClientConnection>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateIdentifier`] if a connection with the
    /// same ID is already registered. The registered handle is left untouched.
    pub fn register(&self, conn: ClientConnection) -> Result<(), RegistryError> {
        match self.connections.entry(conn.id().clone()) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateIdentifier(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!(connection = %conn.id(), "Connection registered");
                entry.insert(conn);
                Ok(())
            }
        }
    }

    /// Remove a connection. Absent IDs are ignored.
    ///
    /// Returns the removed handle, if there was one.
    pub fn unregister(&self, id: &ConnectionId) -> Option<ClientConnection> {
        let removed = self.connections.remove(id).map(|(_, conn)| conn);
        if removed.is_some() {
            debug!(connection = %id, "Connection unregistered");
        }
        removed
    }

    /// Snapshot of every registered connection. Order is unspecified.
    #[must_use]
    pub fn list(&self) -> Vec<ClientConnection> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Look up a connection by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ClientConnection> {
        self.connections.get(id).map(|e| e.value().clone())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    /// Queue an event on every registered connection.
    ///
    /// Returns the number of connections that accepted it.
    pub fn broadcast(&self, event: Event) -> usize {
        let event = Arc::new(event);
        let count = self
            .connections
            .iter()
            .filter(|e| e.value().send(Arc::clone(&event)))
            .count();
        trace!(event = %event.name, recipients = count, "Broadcast to all clients");
        count
    }
}
