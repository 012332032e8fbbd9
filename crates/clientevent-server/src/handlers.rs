//! Per-connection task.
//!
//! Each accepted connection runs [`handle_connection`] to completion:
//! handshake, registration, the connect listener, the frame loop, and
//! finally the disconnect sequence. The disconnect sequence runs on every
//! exit path once the connection was registered.
//!
//! Every socket write races the shutdown signal, and the closing handshake
//! is bounded by [`CLOSE_TIMEOUT`], so a client that stops reading cannot
//! hold up server shutdown.

use clientevent_core::{ClientConnection, ConnectionId, Event, Outbound, QueryParams};
use clientevent_protocol::{error_codes, Frame, PROTOCOL_VERSION};
use clientevent_transport::{FrameSink, FrameStream, Incoming, TransportError};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

use crate::metrics::{self, ConnectionMetricsGuard};
use crate::server::Shared;
use crate::shutdown::ShutdownSignal;

/// How long the close frame may take to reach the client before the socket
/// is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Drive one connection from accept to cleanup.
pub(crate) async fn handle_connection(
    incoming: Incoming,
    shared: Arc<Shared>,
    mut shutdown: ShutdownSignal,
) {
    let remote_addr = incoming.remote_addr();
    if shutdown.is_triggered() {
        return;
    }

    let ws = tokio::select! {
        biased;
        () = shutdown.recv() => return,
        handshake = incoming.handshake() => match handshake {
            Ok(ws) => ws,
            Err(e) => {
                debug!(%remote_addr, error = %e, "Handshake failed");
                metrics::record_error("handshake");
                return;
            }
        },
    };

    let query = ws.query().map(QueryParams::parse).unwrap_or_default();
    let (conn, mut outbound) = ClientConnection::new(
        ConnectionId::generate(),
        query,
        Some(remote_addr),
        Arc::downgrade(&shared.rooms),
    );
    let (mut sink, mut stream) = ws.split();

    if let Err(e) = shared.registry.register(conn.clone()) {
        error!(connection = %conn.id(), error = %e, "Rejecting connection");
        metrics::record_rejected("duplicate_id");
        conn.mark_closed();
        close(&conn, sink).await;
        return;
    }

    let _metrics_guard = ConnectionMetricsGuard::new();
    info!(connection = %conn.id(), %remote_addr, "Client connected");

    if shared.dispatcher.dispatch_connect(&conn).is_failure() {
        metrics::record_listener_failure("connect");
    }
    metrics::set_active_rooms(shared.rooms.room_count());

    let connected = Frame::connected(conn.id().as_str(), PROTOCOL_VERSION);
    let mut open = tokio::select! {
        biased;
        () = shutdown.recv() => false,
        sent = sink.send(&connected) => match sent {
            Ok(()) => true,
            Err(e) => {
                debug!(connection = %conn.id(), error = %e, "Failed to send connected frame");
                false
            }
        },
    };

    while open {
        open = tokio::select! {
            biased;

            () = shutdown.recv() => {
                debug!(connection = %conn.id(), "Closing connection for shutdown");
                false
            }

            still_open = step(&conn, &shared, &mut sink, &mut stream, &mut outbound) => still_open,
        };
    }

    close(&conn, sink).await;
    drop(stream);
    teardown(&conn, &shared);
}

/// Handle the next queued event or inbound frame. Returns `false` once the
/// connection should close.
async fn step(
    conn: &ClientConnection,
    shared: &Shared,
    sink: &mut FrameSink,
    stream: &mut FrameStream,
    outbound: &mut UnboundedReceiver<Outbound>,
) -> bool {
    tokio::select! {
        biased;

        queued = outbound.recv() => match queued {
            Some(Outbound::Event(event)) => {
                let frame = Frame::event(event.name.clone(), event.payload.to_vec());
                match sink.send(&frame).await {
                    Ok(()) => {
                        metrics::record_event(event.payload_size(), "outbound");
                        true
                    }
                    Err(e) => {
                        debug!(connection = %conn.id(), error = %e, "Failed to send event");
                        false
                    }
                }
            }
            Some(Outbound::Close) | None => {
                debug!(connection = %conn.id(), "Closing connection on request");
                false
            }
        },

        received = stream.recv() => match received {
            Ok(Some(frame)) => handle_frame(conn, shared, sink, frame).await.is_continue(),
            Ok(None) => {
                debug!(connection = %conn.id(), "Client closed connection");
                false
            }
            Err(TransportError::Protocol(e)) => {
                warn!(connection = %conn.id(), error = %e, "Malformed frame");
                metrics::record_error("malformed_frame");
                let reply = Frame::error(error_codes::MALFORMED_FRAME, e.to_string());
                sink.send(&reply).await.is_ok()
            }
            Err(TransportError::MessageTooLarge(size)) => {
                warn!(connection = %conn.id(), size, "Message too large, closing");
                metrics::record_error("message_too_large");
                let reply = Frame::error(
                    error_codes::MESSAGE_TOO_LARGE,
                    format!("message of {size} bytes exceeds the limit"),
                );
                let _ = sink.send(&reply).await;
                false
            }
            Err(e) => {
                debug!(connection = %conn.id(), error = %e, "Connection lost");
                false
            }
        },
    }
}

/// Send the close frame, then drop the write half whether or not the
/// client took it.
async fn close(conn: &ClientConnection, mut sink: FrameSink) {
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            debug!(connection = %conn.id(), error = %e, "Failed to send close frame");
        }
        Err(_) => {
            debug!(connection = %conn.id(), "Close timed out, dropping socket");
        }
    }
}

async fn handle_frame(
    conn: &ClientConnection,
    shared: &Shared,
    sink: &mut FrameSink,
    frame: Frame,
) -> ControlFlow<()> {
    match frame {
        Frame::Event { event, payload } => {
            metrics::record_event(payload.len(), "inbound");
            let event = Event::new(event, payload).with_source(conn.id().clone());
            if shared.dispatcher.dispatch_event(conn, &event).is_failure() {
                metrics::record_listener_failure("event");
            }
            ControlFlow::Continue(())
        }
        Frame::Ping { timestamp } => match sink.send(&Frame::pong(timestamp)).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        },
        Frame::Pong { .. } => ControlFlow::Continue(()),
        other => {
            let reply = Frame::error(
                error_codes::UNEXPECTED_FRAME,
                format!("unexpected {:?} frame from client", other.frame_type()),
            );
            match sink.send(&reply).await {
                Ok(()) => ControlFlow::Continue(()),
                Err(_) => ControlFlow::Break(()),
            }
        }
    }
}

/// Disconnect listener first, while the connection is still resolvable;
/// then rooms and registry.
fn teardown(conn: &ClientConnection, shared: &Shared) {
    if shared.dispatcher.dispatch_disconnect(conn).is_failure() {
        metrics::record_listener_failure("disconnect");
    }

    conn.mark_closed();
    let rooms = shared.rooms.remove_connection(conn.id());
    shared.registry.unregister(conn.id());
    metrics::set_active_rooms(shared.rooms.room_count());

    info!(connection = %conn.id(), rooms = rooms.len(), "Client disconnected");
}
