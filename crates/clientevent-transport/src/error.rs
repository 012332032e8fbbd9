//! Transport errors.

use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    /// WebSocket upgrade failed.
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Incoming message exceeded the configured limit.
    #[error("Message of {0} bytes exceeds the configured limit")]
    MessageTooLarge(usize),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] clientevent_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
