use std::sync::Arc;
use std::time::Duration;

use chisel_protocol::ServerPacket;
use tracing::{debug, info};

use crate::server::Server;

/// Keepalive: a Ping to every client on a fixed cadence. Dead
/// connections surface as skipped sends and reap themselves through
/// their receive loops.
pub async fn keepalive(server: Arc<Server>) {
    let mut shutdown = server.shutdown.subscribe();
    let mut interval = tokio::time::interval(Duration::from_secs(45));
    interval.tick().await; // immediate first tick is pointless
    loop {
        tokio::select! {
            _ = interval.tick() => {
                debug!(players = server.players.count(), "keepalive ping");
                server.players.send_global_packet(&ServerPacket::Ping, &[]);
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Periodic save of every persistent world.
pub async fn periodic_save(server: Arc<Server>) {
    let secs = server.config_snapshot().save_interval_seconds.max(30);
    let mut shutdown = server.shutdown.subscribe();
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let config = server.config_snapshot();
                let saved = server.worlds.save_all(&server.registries, &config);
                if saved > 0 {
                    info!(saved, "periodic world save");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
