//! Server lifecycle.
//!
//! [`start`] validates the configuration, loads TLS material, binds the
//! listener and spawns the accept loop. The returned [`ServerHandle`] is the
//! only way to reach the running server: it answers registry and room
//! queries and owns shutdown.

use bytes::Bytes;
use clientevent_core::{
    ClientConnection, ConnectionRegistry, Event, EventDispatcher, Listeners, RoomDirectory,
    RoomHandle,
};
use clientevent_transport::{
    load_acceptor, FsKeyStoreLoader, KeyStoreLoader, WebSocketConfig, WebSocketTransport,
};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handlers::handle_connection;
use crate::metrics;
use crate::shutdown::{self, ShutdownSignal, ShutdownTrigger};

/// Lifecycle state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerState {
    /// Configured, not yet started.
    Created = 0,
    /// Loading TLS material and binding.
    Starting = 1,
    /// Accepting connections.
    Running = 2,
    /// Closing connections.
    Stopping = 3,
    /// Every connection task has finished and the listener is closed.
    Stopped = 4,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Created,
            1 => ServerState::Starting,
            2 => ServerState::Running,
            3 => ServerState::Stopping,
            _ => ServerState::Stopped,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Created => "created",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// State shared by the handle, the accept loop and every connection task.
pub(crate) struct Shared {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) rooms: Arc<RoomDirectory>,
    pub(crate) dispatcher: EventDispatcher,
    state: AtomicU8,
}

impl Shared {
    fn new(listeners: Listeners) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            rooms: Arc::new(RoomDirectory::new()),
            dispatcher: EventDispatcher::new(listeners),
            state: AtomicU8::new(ServerState::Created as u8),
        }
    }

    fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ServerState) {
        debug!(%state, "Server state changed");
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Start a server, loading any TLS key store from the filesystem.
///
/// # Errors
///
/// See [`start_with_loader`].
pub async fn start(config: ServerConfig, listeners: Listeners) -> Result<ServerHandle, ServerError> {
    start_with_loader(config, listeners, &FsKeyStoreLoader::new()).await
}

/// Start a server, loading any TLS key store through `loader`.
///
/// Nothing stays bound if startup fails.
///
/// # Errors
///
/// - [`ServerError::Config`] if the configuration is invalid
/// - [`ServerError::KeyStoreNotFound`] if TLS is enabled and the key store is missing
/// - [`ServerError::TlsConfig`] if the key store is unusable
/// - [`ServerError::Bind`] if the listener cannot be bound
pub async fn start_with_loader(
    config: ServerConfig,
    listeners: Listeners,
    loader: &dyn KeyStoreLoader,
) -> Result<ServerHandle, ServerError> {
    let shared = Arc::new(Shared::new(listeners));
    shared.set_state(ServerState::Starting);

    config.validate()?;
    let bind_addr = config.bind_addr()?;

    let tls = if config.tls.enabled {
        if config.tls.ignores_password() {
            warn!(
                key_store = %config.tls.key_store.display(),
                "Key store password is set but PEM key stores are read unencrypted; ignoring it"
            );
        }
        Some(load_acceptor(loader, &config.tls.key_store)?)
    } else {
        None
    };

    let ws_config = WebSocketConfig {
        bind_addr,
        max_message_size: config.limits.max_message_size,
    };
    let transport = WebSocketTransport::bind(ws_config, tls)
        .await
        .map_err(|source| ServerError::Bind {
            addr: bind_addr,
            source,
        })?;
    let local_addr = transport.local_addr().map_err(|source| ServerError::Bind {
        addr: bind_addr,
        source,
    })?;

    let (trigger, signal) = shutdown::channel();
    let accept_task = tokio::spawn(accept_loop(
        transport,
        Arc::clone(&shared),
        signal,
        config.limits.max_connections,
    ));

    shared.set_state(ServerState::Running);

    let scheme = if config.tls.enabled { "wss" } else { "ws" };
    info!("ClientEvent server listening on {scheme}://{local_addr}");

    Ok(ServerHandle {
        shared,
        config,
        local_addr,
        trigger,
        accept_task: Mutex::new(Some(accept_task)),
    })
}

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay before the next accept after a failure; doubles per consecutive
/// failure up to [`ACCEPT_BACKOFF_MAX`].
fn next_accept_backoff(previous: Option<Duration>) -> Duration {
    previous.map_or(ACCEPT_BACKOFF_MIN, |delay| (delay * 2).min(ACCEPT_BACKOFF_MAX))
}

async fn accept_loop(
    transport: WebSocketTransport,
    shared: Arc<Shared>,
    mut shutdown: ShutdownSignal,
    max_connections: usize,
) {
    let mut tasks = JoinSet::new();
    let mut backoff = None;

    loop {
        tokio::select! {
            biased;

            () = shutdown.recv() => break,

            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Connection task failed");
                }
            }

            accepted = transport.accept() => match accepted {
                Ok(incoming) => {
                    backoff = None;
                    if tasks.len() >= max_connections {
                        warn!(
                            remote_addr = %incoming.remote_addr(),
                            max_connections,
                            "Connection limit reached, rejecting"
                        );
                        metrics::record_rejected("limit");
                        continue;
                    }
                    tasks.spawn(handle_connection(incoming, Arc::clone(&shared), shutdown.clone()));
                }
                Err(e) => {
                    let delay = next_accept_backoff(backoff);
                    backoff = Some(delay);
                    warn!(error = %e, retry_in = ?delay, "Failed to accept connection");
                    metrics::record_error("accept");

                    tokio::select! {
                        biased;
                        () = shutdown.recv() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            },
        }
    }

    drop(transport);
    debug!(connections = tasks.len(), "Listener closed, waiting for connections");

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Connection task failed");
        }
    }
}

/// Handle to a running server.
///
/// Dropping the handle signals shutdown without waiting for it; call
/// [`stop`](Self::stop) to wait until every connection is closed.
pub struct ServerHandle {
    shared: Arc<Shared>,
    config: ServerConfig,
    local_addr: SocketAddr,
    trigger: ShutdownTrigger,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServerHandle {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.shared.state()
    }

    /// The configuration the server was started with.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close every connection and wait for cleanup.
    ///
    /// Every live connection gets its disconnect listener before this
    /// returns. Calling `stop` again, concurrently or later, waits for the
    /// first call and then returns.
    pub async fn stop(&self) {
        let mut accept_task = self.accept_task.lock().await;
        let Some(task) = accept_task.take() else {
            return;
        };

        info!(connections = self.shared.registry.count(), "Stopping server");
        self.shared.set_state(ServerState::Stopping);
        self.trigger.trigger();

        if let Err(e) = task.await {
            error!(error = %e, "Accept loop failed");
        }

        self.shared.set_state(ServerState::Stopped);
        info!("Server stopped");
    }

    /// Every registered connection.
    #[must_use]
    pub fn get_all_clients(&self) -> Vec<ClientConnection> {
        self.shared.registry.list()
    }

    /// Members of `room`. Empty for unknown rooms.
    #[must_use]
    pub fn get_room_clients(&self, room: &str) -> Vec<ClientConnection> {
        self.shared.rooms.members_of(room)
    }

    /// A handle bound to `room`. The room need not exist yet.
    #[must_use]
    pub fn get_room(&self, room: &str) -> RoomHandle {
        self.shared.rooms.room(room)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.shared.registry.count()
    }

    /// Names of all non-empty rooms.
    #[must_use]
    pub fn room_names(&self) -> Vec<String> {
        self.shared.rooms.room_names()
    }

    /// Look up a registered connection by id.
    #[must_use]
    pub fn get_client(&self, id: &str) -> Option<ClientConnection> {
        self.shared.registry.get(id)
    }

    /// Queue an event for every registered connection.
    ///
    /// Returns the number of connections that accepted it.
    pub fn broadcast_event(&self, name: impl Into<String>, payload: impl Into<Bytes>) -> usize {
        self.shared.registry.broadcast(Event::new(name, payload))
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .field("clients", &self.client_count())
            .finish()
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.trigger.trigger();
    }
}
