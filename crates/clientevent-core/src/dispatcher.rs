//! Lifecycle event dispatch.
//!
//! The dispatcher turns transport-level accept/disconnect/message events into
//! calls to application listeners. Per connection it guarantees:
//!
//! - the connect listener runs at most once, before anything else;
//! - event listeners only run between connect and disconnect;
//! - the disconnect listener runs at most once, and only after connect.
//!
//! A listener that returns an error or panics is logged and otherwise
//! ignored; the caller always gets control back so cleanup can proceed.

use crate::connection::{ClientConnection, Phase};
use crate::event::Event;
use crate::handshake::HandshakeParams;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Listener invoked when a connection is established.
pub type ConnectListener =
    Arc<dyn Fn(&ClientConnection, &HandshakeParams) -> anyhow::Result<()> + Send + Sync>;

/// Listener invoked when a connection is lost.
pub type DisconnectListener = Arc<dyn Fn(&ClientConnection) -> anyhow::Result<()> + Send + Sync>;

/// Listener invoked for each event a client sends.
pub type EventListener =
    Arc<dyn Fn(&ClientConnection, &Event) -> anyhow::Result<()> + Send + Sync>;

/// Application listeners. Any of them may be absent.
#[derive(Clone, Default)]
pub struct Listeners {
    on_connect: Option<ConnectListener>,
    on_disconnect: Option<DisconnectListener>,
    on_event: Option<EventListener>,
}

impl Listeners {
    /// No listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect listener.
    #[must_use]
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&ClientConnection, &HandshakeParams) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Set the disconnect listener.
    #[must_use]
    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: Fn(&ClientConnection) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Set the listener for client-sent events.
    #[must_use]
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&ClientConnection, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

/// Result of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The listener ran and returned `Ok`.
    Completed,
    /// No listener was configured.
    NoListener,
    /// The connection was not in a state where this event may fire.
    Suppressed,
    /// The listener returned an error or panicked.
    Failed,
}

impl DispatchOutcome {
    /// `true` if the listener failed.
    #[must_use]
    pub fn is_failure(self) -> bool {
        self == DispatchOutcome::Failed
    }
}

/// Invokes application listeners for connection lifecycle events.
#[derive(Debug, Clone, Default)]
pub struct EventDispatcher {
    listeners: Listeners,
}

impl EventDispatcher {
    /// Create a dispatcher for the given listeners.
    #[must_use]
    pub fn new(listeners: Listeners) -> Self {
        Self { listeners }
    }

    /// Fire the connect listener for a freshly registered connection.
    ///
    /// The listener receives the connection's folded handshake parameters.
    pub fn dispatch_connect(&self, conn: &ClientConnection) -> DispatchOutcome {
        if !conn.advance_phase(Phase::Accepted, Phase::Connected) {
            return DispatchOutcome::Suppressed;
        }

        let Some(listener) = &self.listeners.on_connect else {
            return DispatchOutcome::NoListener;
        };

        let params = conn.query().fold();
        debug!(connection = %conn.id(), params = params.len(), "Dispatching connect");
        invoke("connect", conn, || listener(conn, &params))
    }

    /// Fire the disconnect listener.
    ///
    /// Suppressed if connect never fired or disconnect already fired.
    pub fn dispatch_disconnect(&self, conn: &ClientConnection) -> DispatchOutcome {
        if !conn.advance_phase(Phase::Connected, Phase::Disconnected) {
            return DispatchOutcome::Suppressed;
        }

        let Some(listener) = &self.listeners.on_disconnect else {
            return DispatchOutcome::NoListener;
        };

        debug!(connection = %conn.id(), "Dispatching disconnect");
        invoke("disconnect", conn, || listener(conn))
    }

    /// Fire the event listener for a client-sent event.
    pub fn dispatch_event(&self, conn: &ClientConnection, event: &Event) -> DispatchOutcome {
        if !conn.is_connected() {
            return DispatchOutcome::Suppressed;
        }

        let Some(listener) = &self.listeners.on_event else {
            return DispatchOutcome::NoListener;
        };

        invoke("event", conn, || listener(conn, event))
    }
}

fn invoke<F>(kind: &'static str, conn: &ClientConnection, f: F) -> DispatchOutcome
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => DispatchOutcome::Completed,
        Ok(Err(e)) => {
            error!(connection = %conn.id(), listener = kind, error = %format!("{e:#}"), "Listener failed");
            DispatchOutcome::Failed
        }
        Err(payload) => {
            error!(
                connection = %conn.id(),
                listener = kind,
                panic = %panic_message(payload.as_ref()),
                "Listener panicked"
            );
            DispatchOutcome::Failed
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
