//! Shared helpers for the server-side tests: a bootstrapped server over
//! a temp directory and channel-backed players that skip the socket
//! layer entirely.

use std::collections::HashSet;
use std::sync::Arc;

use chisel_protocol::ServerPacket;
use chisel_types::{CpeExtension, Username};
use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::player::{Outbound, Player};
use crate::server::Server;

pub struct TestHarness {
    pub server: Arc<Server>,
    // Held for its Drop: the config and worlds live inside.
    _dir: tempfile::TempDir,
}

pub fn test_server(mutate: impl FnOnce(&mut ServerConfig)) -> TestHarness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ServerConfig::default();
    config.world_save_location = Some(dir.path().join("worlds").to_string_lossy().into_owned());
    config.default_world_size = crate::config::WorldSize { x: 16, y: 16, z: 16 };
    mutate(&mut config);
    let config_path = dir.path().join("server.json");
    let server = Server::bootstrap(config, config_path).unwrap();
    TestHarness { server, _dir: dir }
}

pub fn test_player(
    name: &str,
    extensions: &[(&str, i32)],
) -> (Arc<Player>, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cpe: HashSet<CpeExtension> = extensions
        .iter()
        .map(|(n, v)| CpeExtension::new(*n, *v))
        .collect();
    let player = Arc::new(Player::new(
        Username::new(name).unwrap(),
        name.to_string(),
        String::new(),
        "127.0.0.1:5000".parse().unwrap(),
        cpe,
        tx,
    ));
    (player, rx)
}

/// Pull every queued packet out of a player's outbound channel.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<ServerPacket> {
    let mut packets = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let Outbound::Packet(packet) = event {
            packets.push(packet);
        }
    }
    packets
}

/// Count packets matching a predicate in a drained queue.
pub fn count_matching(packets: &[ServerPacket], pred: impl Fn(&ServerPacket) -> bool) -> usize {
    packets.iter().filter(|p| pred(p)).count()
}
