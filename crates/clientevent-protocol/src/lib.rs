//! # clientevent-protocol
//!
//! Wire protocol for the ClientEvent realtime server.
//!
//! Every WebSocket binary message carries exactly one frame: a 4-byte
//! big-endian length prefix followed by a MessagePack body.
//!
//! ## Frame Types
//!
//! - `Connected` - Sent by the server once the connection is registered
//! - `Event` - Named event with an opaque payload, in both directions
//! - `Ping` / `Pong` - Application-level keepalive
//! - `Error` - Server-reported protocol error
//!
//! ## Example
//!
//! ```rust
//! use clientevent_protocol::{Frame, codec};
//!
//! let frame = Frame::event("chat:message", b"Hello, world!".to_vec());
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{error_codes, Frame, FrameType, PROTOCOL_VERSION};
