//! Frame types for the ClientEvent protocol.
//!
//! Event names and payloads are opaque to the server; it never inspects
//! the payload bytes.

use serde::{Deserialize, Serialize};

/// Protocol version announced in [`Frame::Connected`].
pub const PROTOCOL_VERSION: u8 = 1;

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connected = 0x01,
    Event = 0x02,
    Ping = 0x03,
    Pong = 0x04,
    Error = 0x05,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connected),
            0x02 => Ok(FrameType::Event),
            0x03 => Ok(FrameType::Ping),
            0x04 => Ok(FrameType::Pong),
            0x05 => Ok(FrameType::Error),
            _ => Err("Invalid frame type"),
        }
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Connection accepted and registered.
    #[serde(rename = "connected")]
    Connected {
        /// Identifier the server assigned to this connection.
        connection_id: String,
        /// Protocol version spoken by the server.
        version: u8,
    },

    /// A named event.
    #[serde(rename = "event")]
    Event {
        /// Event name.
        event: String,
        /// Opaque payload.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Error report.
    #[serde(rename = "error")]
    Error {
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Event { .. } => FrameType::Event,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Error { .. } => FrameType::Error,
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
        }
    }

    /// Create a new Event frame.
    #[must_use]
    pub fn event(event: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Frame::Event {
            event: event.into(),
            payload: payload.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Ping frame with timestamp.
    #[must_use]
    pub fn ping_with_timestamp(timestamp: u64) -> Self {
        Frame::Ping {
            timestamp: Some(timestamp),
        }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }
}

/// Error codes carried by [`Frame::Error`].
pub mod error_codes {
    /// The frame could not be decoded.
    pub const MALFORMED_FRAME: u16 = 1001;
    /// The client sent a frame type only the server may send.
    pub const UNEXPECTED_FRAME: u16 = 1002;
    /// The message exceeded the configured size limit.
    pub const MESSAGE_TOO_LARGE: u16 = 1009;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type() {
        let event = Frame::event("greet", b"hello".to_vec());
        assert_eq!(event.frame_type(), FrameType::Event);

        let connected = Frame::connected("conn_1", PROTOCOL_VERSION);
        assert_eq!(connected.frame_type(), FrameType::Connected);
        assert!(matches!(connected, Frame::Connected { version: 1, .. }));
    }

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::try_from(0x02), Ok(FrameType::Event));
        assert_eq!(u8::from(FrameType::Error), 0x05);
        assert!(FrameType::try_from(0x42).is_err());
    }
}
