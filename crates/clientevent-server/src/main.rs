//! # ClientEvent Server
//!
//! Realtime event server with rooms.
//!
//! ## Usage
//!
//! ```bash
//! # Settings from the [clientevent] table of ./clientevent.toml
//! clientevent
//!
//! # Run with environment variables
//! CLIENTEVENT_PORT=8080 CLIENTEVENT_HOST=0.0.0.0 clientevent
//! ```
//!
//! Clients join the rooms named by their `room` query parameters, e.g.
//! `ws://localhost:8080/?room=lobby&room=news`.

use anyhow::{Context, Result};
use clientevent_server::{
    join_room, metrics, start, ConfigProvider, FileConfigProvider, Listeners,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const NAMESPACE: &str = "clientevent";

fn listeners() -> Listeners {
    Listeners::new()
        .on_connect(|conn, params| {
            let rooms = params.get("room").map(|v| v.values()).unwrap_or_default();
            for room in &rooms {
                join_room(room, conn);
            }
            info!(connection = %conn.id(), rooms = ?rooms, "Joined rooms");
            Ok(())
        })
        .on_event(|conn, event| {
            // Relay to everyone else in the sender's rooms.
            for room in conn.rooms() {
                if let Some(handle) = conn.room(&room) {
                    handle.send_event_except(event.name.clone(), event.payload.clone(), conn);
                }
            }
            Ok(())
        })
        .on_disconnect(|conn| {
            info!(connection = %conn.id(), rooms = ?conn.rooms(), "Leaving rooms");
            Ok(())
        })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clientevent=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = FileConfigProvider::new()
        .get_config(NAMESPACE)
        .context("Failed to load configuration")?;

    if config.metrics.enabled {
        metrics::init_metrics();
        metrics::start_metrics_server(config.metrics.port)
            .context("Failed to start metrics exporter")?;
    }

    let server = start(config, listeners()).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    server.stop().await;
    Ok(())
}
