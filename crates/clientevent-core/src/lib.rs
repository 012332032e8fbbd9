//! # clientevent-core
//!
//! Connection bookkeeping and event dispatch for the ClientEvent server.
//!
//! This crate is transport-agnostic. It provides:
//!
//! - **ClientConnection** - Cloneable handle for one live client session
//! - **ConnectionRegistry** - Every currently connected client
//! - **RoomDirectory** - Named rooms and their members
//! - **EventDispatcher** - Connect/disconnect/event callbacks with failure isolation
//! - **HandshakeParams** - Folded view of the handshake query string
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────────┐     ┌───────────────┐
//! │  Transport   │────▶│  EventDispatcher   │────▶│  Application  │
//! └──────────────┘     └────────────────────┘     └───────────────┘
//!        │                                                │
//!        ▼                                                ▼
//! ┌────────────────────┐                       ┌────────────────────┐
//! │ ConnectionRegistry │                       │   RoomDirectory    │
//! └────────────────────┘                       └────────────────────┘
//! ```

pub mod connection;
pub mod directory;
pub mod dispatcher;
pub mod event;
pub mod handshake;
pub mod registry;
pub mod room;

pub use connection::{ClientConnection, ConnectionId, Outbound};
pub use directory::{DirectoryStats, RoomDirectory};
pub use dispatcher::{DispatchOutcome, EventDispatcher, Listeners};
pub use event::Event;
pub use handshake::{HandshakeParams, ParamValue, QueryParams};
pub use registry::{ConnectionRegistry, RegistryError};
pub use room::{Room, RoomHandle};

/// Add `conn` to the room named `room_name`.
///
/// Does nothing if the connection has already been closed.
pub fn join_room(room_name: &str, conn: &ClientConnection) {
    conn.join_room(room_name);
}

/// Remove `conn` from the room named `room_name`.
///
/// Does nothing if the connection is not a member.
pub fn leave_room(room_name: &str, conn: &ClientConnection) {
    conn.leave_room(room_name);
}
