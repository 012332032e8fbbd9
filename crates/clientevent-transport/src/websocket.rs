//! WebSocket transport implementation.
//!
//! This module provides a WebSocket-based transport using tokio-tungstenite,
//! optionally wrapped in TLS.

use bytes::Bytes;
use clientevent_protocol::{codec, Frame};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::error::CapacityError;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig as WsProtocolConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::TransportError;

/// Byte stream under a WebSocket: plain TCP or TLS over TCP.
trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

type BoxedIo = Box<dyn Io>;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

impl WebSocketConfig {
    fn protocol_config(&self) -> WsProtocolConfig {
        let mut config = WsProtocolConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);
        config
    }
}

/// WebSocket listener.
pub struct WebSocketTransport {
    listener: TcpListener,
    config: WebSocketConfig,
    tls: Option<TlsAcceptor>,
}

impl WebSocketTransport {
    /// Bind a listener. When `tls` is set every accepted connection must
    /// complete a TLS handshake before the WebSocket upgrade.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn bind(
        config: WebSocketConfig,
        tls: Option<TlsAcceptor>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr).await?;

        info!(
            addr = %listener.local_addr()?,
            secure = tls.is_some(),
            "WebSocket transport listening"
        );

        Ok(Self {
            listener,
            config,
            tls,
        })
    }

    /// Get the local address this transport is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Whether connections are wrapped in TLS.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    /// Accept the next TCP connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the accept call fails.
    pub async fn accept(&self) -> Result<Incoming, TransportError> {
        let (stream, remote_addr) = self.listener.accept().await?;
        debug!(%remote_addr, "Accepted TCP connection");

        Ok(Incoming {
            stream,
            remote_addr,
            tls: self.tls.clone(),
            config: self.config.clone(),
        })
    }
}

/// A TCP connection that has not yet completed its handshakes.
pub struct Incoming {
    stream: TcpStream,
    remote_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    config: WebSocketConfig,
}

impl Incoming {
    /// Peer address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Run the TLS handshake (if configured) and the WebSocket upgrade.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TlsHandshake`] or
    /// [`TransportError::Handshake`] if either step fails.
    pub async fn handshake(self) -> Result<WebSocketConnection, TransportError> {
        let remote_addr = self.remote_addr;

        let io: BoxedIo = match &self.tls {
            Some(acceptor) => {
                let tls_stream = acceptor
                    .accept(self.stream)
                    .await
                    .map_err(|e| TransportError::TlsHandshake(e.to_string()))?;
                Box::new(tls_stream)
            }
            None => Box::new(self.stream),
        };

        let mut query: Option<String> = None;
        let capture_query = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            query = req.uri().query().map(str::to_owned);
            Ok(resp)
        };

        let stream =
            accept_hdr_async_with_config(io, capture_query, Some(self.config.protocol_config()))
                .await
                .map_err(|e| TransportError::Handshake(e.to_string()))?;

        debug!(%remote_addr, query = ?query, "WebSocket handshake completed");

        Ok(WebSocketConnection {
            stream,
            remote_addr,
            query,
            max_message_size: self.config.max_message_size,
        })
    }
}

/// An upgraded WebSocket connection.
pub struct WebSocketConnection {
    stream: WebSocketStream<BoxedIo>,
    remote_addr: SocketAddr,
    query: Option<String>,
    max_message_size: usize,
}

impl WebSocketConnection {
    /// Peer address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Raw query string of the upgrade request, without the leading `?`.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Split into independently owned write and read halves.
    #[must_use]
    pub fn split(self) -> (FrameSink, FrameStream) {
        let (sink, stream) = self.stream.split();
        (
            FrameSink {
                inner: sink,
                open: true,
            },
            FrameStream {
                inner: stream,
                max_message_size: self.max_message_size,
            },
        )
    }
}

/// Write half of a connection.
pub struct FrameSink {
    inner: SplitSink<WebSocketStream<BoxedIo>, Message>,
    open: bool,
}

impl FrameSink {
    /// Encode and send a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the connection is closed.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let data = codec::encode(frame)?;
        self.send_raw(data).await
    }

    /// Send already-encoded frame bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    pub async fn send_raw(&mut self, data: Bytes) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }

        self.inner
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Send a close frame. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the close frame cannot be written.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.open, false) {
            return Ok(());
        }

        match self.inner.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(format!("Failed to close: {e}"))),
        }
    }
}

/// Read half of a connection.
pub struct FrameStream {
    inner: SplitStream<WebSocketStream<BoxedIo>>,
    max_message_size: usize,
}

impl FrameStream {
    /// Receive the next frame. Each message is decoded on its own and
    /// must hold exactly one frame.
    ///
    /// Returns `Ok(None)` once the peer has closed the connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::MessageTooLarge`] for oversized messages,
    /// [`TransportError::Protocol`] for undecodable ones, and
    /// [`TransportError::ReceiveFailed`] for socket failures.
    pub async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return self.decode(&data).map(Some);
                }
                Some(Ok(Message::Text(text))) => {
                    // Text frames carry the same encoding as binary ones.
                    return self.decode(text.as_bytes()).map(Some);
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
                Some(Err(WsError::Capacity(CapacityError::MessageTooLong { size, .. }))) => {
                    warn!(size, max = self.max_message_size, "Message too large");
                    return Err(TransportError::MessageTooLarge(size));
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    fn decode(&self, data: &[u8]) -> Result<Frame, TransportError> {
        if data.len() > self.max_message_size {
            warn!(
                size = data.len(),
                max = self.max_message_size,
                "Message too large"
            );
            return Err(TransportError::MessageTooLarge(data.len()));
        }

        Ok(codec::decode(data)?)
    }
}
