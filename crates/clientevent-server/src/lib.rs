//! # clientevent-server
//!
//! Realtime event server: accepts WebSocket clients (optionally over TLS),
//! groups them into rooms and reports their lifecycle to application code.
//!
//! ```rust,ignore
//! use clientevent_server::{join_room, start, Listeners, ServerConfig};
//!
//! let listeners = Listeners::new()
//!     .on_connect(|conn, params| {
//!         if let Some(room) = params.get("room").and_then(|v| v.as_single()) {
//!             join_room(room, conn);
//!         }
//!         Ok(())
//!     })
//!     .on_disconnect(|conn| {
//!         println!("{} left", conn.id());
//!         Ok(())
//!     });
//!
//! let server = start(ServerConfig::new("0.0.0.0", 8080), listeners).await?;
//! server.get_room("lobby").send_event("welcome", b"hi".to_vec());
//! server.stop().await;
//! ```

pub mod config;
pub mod error;
mod handlers;
pub mod metrics;
pub mod server;
mod shutdown;

pub use clientevent_core::{
    join_room, leave_room, ClientConnection, ConnectionId, Event, HandshakeParams, Listeners,
    ParamValue, RoomHandle,
};
pub use config::{
    ConfigError, ConfigProvider, FileConfigProvider, LimitsConfig, MetricsConfig, ServerConfig,
    TlsConfig,
};
pub use clientevent_transport::{FsKeyStoreLoader, KeyStoreLoader};
pub use error::ServerError;
pub use server::{start, start_with_loader, ServerHandle, ServerState};
