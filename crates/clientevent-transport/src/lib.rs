//! # clientevent-transport
//!
//! Transport layer for the ClientEvent realtime server.
//!
//! - **WebSocket** - `tokio-tungstenite` over plain TCP or TLS
//! - **TLS** - `rustls` acceptor built from a PEM key store
//!
//! The listener only accepts TCP connections; the TLS and WebSocket
//! handshakes run in [`Incoming::handshake`], so a slow client never
//! stalls the accept loop.
//!
//! ```rust,ignore
//! use clientevent_transport::{WebSocketConfig, WebSocketTransport};
//!
//! let transport = WebSocketTransport::bind(WebSocketConfig::default(), None).await?;
//! let incoming = transport.accept().await?;
//! let conn = incoming.handshake().await?;
//! println!("query: {:?}", conn.query());
//! ```

pub mod error;
pub mod tls;
pub mod websocket;

pub use error::TransportError;
pub use tls::{load_acceptor, server_config_from_pem, FsKeyStoreLoader, KeyStoreLoader, TlsError};
pub use websocket::{
    FrameSink, FrameStream, Incoming, WebSocketConfig, WebSocketConnection, WebSocketTransport,
};
