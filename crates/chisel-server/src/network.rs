use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use chisel_blocks::{PlacePolicy, AIR};
use chisel_protocol::{
    ClientPacket, Connection, PacketReader, PacketWriter, ServerPacket, StringMode, NET_TIMEOUT,
};
use chisel_types::{CpeExtension, FixedPos, Username, CPE_MAGIC_BYTE, PROTOCOL_VERSION};
use chisel_world::{Actor, WorldError};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::commands;
use crate::hooks::{ChatCtx, PlacementCtx, PlacementVerdict};
use crate::player::{Outbound, Player};
use crate::server::Server;

/// How a pre-game session ended.
enum SessionEnd {
    /// Close with a DisconnectPlayer carrying this reason.
    Rejected(String),
    /// Close silently (malformed traffic or plain IO failure).
    Dropped(anyhow::Error),
}

impl From<anyhow::Error> for SessionEnd {
    fn from(e: anyhow::Error) -> Self {
        SessionEnd::Dropped(e)
    }
}

struct SessionSetup {
    username: Username,
    display_name: String,
    verification_key: String,
    cpe: HashSet<CpeExtension>,
}

/// Drive one client connection through its entire lifecycle.
pub async fn handle_connection(server: Arc<Server>, stream: TcpStream, peer: SocketAddr) {
    info!(%peer, "new connection");
    let (mut reader, mut writer) = Connection::new(stream).into_split();
    let config = server.config_snapshot();

    // Banned IPs are turned away before any handshake traffic.
    if config.is_ip_banned(&peer.ip().to_string()) {
        info!(%peer, "rejecting banned ip");
        let _ = writer
            .write_packet(
                &ServerPacket::DisconnectPlayer {
                    reason: "You are banned.".into(),
                },
                StringMode::Ascii,
            )
            .await;
        writer.shutdown().await;
        return;
    }

    let setup = match negotiate(&server, &mut reader, &mut writer, peer).await {
        Ok(setup) => setup,
        Err(SessionEnd::Rejected(reason)) => {
            info!(%peer, reason = %reason, "connection rejected");
            let _ = writer
                .write_packet(
                    &ServerPacket::DisconnectPlayer { reason },
                    StringMode::Ascii,
                )
                .await;
            writer.shutdown().await;
            return;
        }
        Err(SessionEnd::Dropped(e)) => {
            debug!(%peer, error = %e, "connection dropped during handshake");
            writer.shutdown().await;
            return;
        }
    };

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let player = Arc::new(Player::new(
        setup.username,
        setup.display_name,
        setup.verification_key,
        peer,
        setup.cpe,
        outbound_tx,
    ));
    // The writer task owns the socket's write half from here on; one
    // writer per connection keeps emit order intact.
    let writer_task = tokio::spawn(writer_pump(writer, outbound_rx, player.string_mode()));

    if let Err(e) = server.players.add(player.clone(), config.server_max_players) {
        info!(player = %player.username, reason = %e, "join refused");
        player.close(Some(&e.0));
        let _ = writer_task.await;
        return;
    }
    info!(
        player = %player.username,
        %peer,
        has_key = !player.verification_key.is_empty(),
        "player identified"
    );

    let is_op = config.is_operator(&player.username);
    player.send_packet(ServerPacket::ServerIdentification {
        protocol_version: PROTOCOL_VERSION,
        name: config.server_name.clone(),
        motd: config.motd.clone(),
        is_op,
    });

    let joined = match server.default_world() {
        Some(world) => server.join_world(&player, &world).map_err(|e| e.0),
        None => Err("No Default World Available".to_string()),
    };
    match joined {
        Ok(()) => {
            for line in &config.default_motd {
                player.send_message(line);
            }
            if let Err(e) = receive_loop(&server, &player, &mut reader).await {
                debug!(player = %player.username, error = %e, "receive loop ended");
            }
        }
        Err(reason) => {
            warn!(player = %player.username, reason = %reason, "world join failed");
            player.close(Some(&reason));
        }
    }

    cleanup(&server, &player);
    let _ = writer_task.await;
    info!(player = %player.username, "connection closed");
}

/// Identification plus (for 0x42 clients) the CPE exchange.
async fn negotiate(
    server: &Arc<Server>,
    reader: &mut PacketReader,
    writer: &mut PacketWriter,
    peer: SocketAddr,
) -> Result<SessionSetup, SessionEnd> {
    let packet = reader
        .read_expected(0x00, StringMode::Ascii, NET_TIMEOUT)
        .await?;
    let ClientPacket::PlayerIdentification {
        protocol_version,
        username,
        verification_key,
        magic,
    } = packet
    else {
        return Err(SessionEnd::Dropped(anyhow::anyhow!("wrong packet")));
    };

    if protocol_version > PROTOCOL_VERSION {
        return Err(SessionEnd::Rejected("Server Outdated".into()));
    }
    if protocol_version < PROTOCOL_VERSION {
        return Err(SessionEnd::Rejected("Client Outdated".into()));
    }

    let display_name = username.trim().to_string();
    let normalized = Username::new(&username)
        .map_err(|e| SessionEnd::Rejected(format!("Invalid Username: {e}")))?;
    if server.config_snapshot().is_banned(&normalized) {
        return Err(SessionEnd::Rejected("You are banned.".into()));
    }

    let cpe = if magic == CPE_MAGIC_BYTE {
        negotiate_cpe(server, reader, writer, peer).await?
    } else {
        debug!(%peer, "vanilla client, skipping cpe negotiation");
        HashSet::new()
    };

    let server_set: HashSet<CpeExtension> =
        server.registries.cpe_extensions.iter().cloned().collect();
    Ok(SessionSetup {
        username: normalized,
        display_name,
        verification_key: verification_key.trim().to_string(),
        cpe: cpe.intersection(&server_set).cloned().collect(),
    })
}

/// ExtInfo/ExtEntry exchange. The mutual set is the intersection of
/// both sides, matched on (name, version).
async fn negotiate_cpe(
    server: &Arc<Server>,
    reader: &mut PacketReader,
    writer: &mut PacketWriter,
    peer: SocketAddr,
) -> Result<HashSet<CpeExtension>, SessionEnd> {
    let ClientPacket::ExtInfo {
        app_name,
        ext_count,
    } = reader
        .read_expected(0x10, StringMode::Ascii, NET_TIMEOUT)
        .await?
    else {
        return Err(SessionEnd::Dropped(anyhow::anyhow!("expected ExtInfo")));
    };
    debug!(%peer, app_name, ext_count, "cpe negotiation");

    let mut client_set = HashSet::new();
    for _ in 0..ext_count.max(0) {
        let ClientPacket::ExtEntry {
            ext_name,
            ext_version,
        } = reader
            .read_expected(0x11, StringMode::Ascii, NET_TIMEOUT)
            .await?
        else {
            return Err(SessionEnd::Dropped(anyhow::anyhow!("expected ExtEntry")));
        };
        client_set.insert(CpeExtension::new(ext_name, ext_version));
    }

    let supported = &server.registries.cpe_extensions;
    writer
        .write_packet(
            &ServerPacket::ExtInfo {
                app_name: format!("chisel {}", env!("CARGO_PKG_VERSION")),
                ext_count: supported.len() as i16,
            },
            StringMode::Ascii,
        )
        .await?;
    for ext in supported {
        writer
            .write_packet(
                &ServerPacket::ExtEntry {
                    ext_name: ext.name.clone(),
                    ext_version: ext.version,
                },
                StringMode::Ascii,
            )
            .await?;
    }
    Ok(client_set)
}

/// The single writer task per connection: consumes queued packets until
/// the channel closes, a Close marker arrives, or the socket dies.
async fn writer_pump(
    mut writer: PacketWriter,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mode: StringMode,
) {
    while let Some(event) = rx.recv().await {
        match event {
            Outbound::Packet(packet) => {
                if let Err(e) = writer.write_packet(&packet, mode).await {
                    if packet.is_critical() {
                        warn!(error = %e, id = packet.id(), "write failed on a critical packet");
                    } else {
                        debug!(error = %e, "write failed, closing connection");
                    }
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    writer.shutdown().await;
}

/// The in-game receive loop. Packet identity, size, and player-loop
/// eligibility all come from the packet registry so modules can extend
/// the wire surface.
async fn receive_loop(
    server: &Arc<Server>,
    player: &Arc<Player>,
    reader: &mut PacketReader,
) -> anyhow::Result<()> {
    let mode = player.string_mode();
    loop {
        let id = reader.read_id(NET_TIMEOUT).await?;
        let Some(descriptor) = server.registries.request_packet(id) else {
            // Unknown id mid-game is survivable; we only lose sync if the
            // client actually sent a body we cannot measure.
            warn!(player = %player.username, id = %format!("0x{id:02X}"), "unknown packet id");
            player.send_message(&format!("&cUnknown Packet 0x{id:02X}&f"));
            continue;
        };
        if !descriptor.player_loop {
            anyhow::bail!("Malformed packet: 0x{id:02X} outside the handshake");
        }
        let body = reader.read_body(descriptor.size - 1).await?;
        let packet = ClientPacket::decode(id, &body, mode)
            .map_err(|e| anyhow::anyhow!("Malformed packet: {e}"))?;

        let outcome = player.subscriptions.offer(id, &packet);
        if outcome.delivered && !outcome.run_handler {
            continue;
        }
        dispatch_packet(server, player, packet);
    }
}

fn dispatch_packet(server: &Arc<Server>, player: &Arc<Player>, packet: ClientPacket) {
    match packet {
        ClientPacket::UpdateBlock {
            x,
            y,
            z,
            mode,
            block_id,
        } => handle_block_update(server, player, x, y, z, mode, block_id),
        ClientPacket::MovementUpdate { pos, .. } => handle_movement(server, player, pos),
        ClientPacket::PlayerMessage { message, .. } => handle_chat(server, player, message),
        other => {
            debug!(player = %player.username, ?other, "packet has no in-game handler");
        }
    }
}

/// Block placement: policy checks, the authoritative write, and the
/// broadcast — or a revert of the client's optimistic change.
fn handle_block_update(
    server: &Arc<Server>,
    player: &Arc<Player>,
    x: i16,
    y: i16,
    z: i16,
    update_mode: u8,
    block_id: u8,
) {
    let Some(world) = player.world_name().and_then(|n| server.worlds.get(&n)) else {
        warn!(player = %player.username, "block update with no world joined");
        return;
    };
    // Mode 0 is "break": the client tells us what used to be there.
    let effective = if update_mode == 0 { AIR } else { block_id };
    let config = server.config_snapshot();
    let is_op = config.is_operator(&player.username);
    let catalog = &server.registries.blocks;

    let denial = 'check: {
        let Ok(block) = catalog.get(effective) else {
            break 'check Some(format!("Unknown Block With ID {effective}"));
        };
        let verdict = server.hooks.placement_check.call(&PlacementCtx {
            block_id: effective,
            is_op,
            is_liquid: block.is_liquid_restricted(),
            is_disabled: config.disabled_blocks.contains(&effective),
            allow_liquid_placement: config.allow_liquid_placement,
        });
        match verdict {
            PlacementVerdict::Deny(msg) => break 'check Some(msg),
            PlacementVerdict::Warn(msg) => player.send_message(&msg),
            PlacementVerdict::Allow => {}
        }
        if block.policy == PlacePolicy::OpOnly && !is_op {
            break 'check Some("You Cannot Place This Block".into());
        }
        match world.set_block(x, y, z, effective, Some(Actor { is_op }), catalog) {
            Ok(()) => None,
            Err(WorldError::ReadOnly) => {
                Some("You Do Not Have Permission To Edit This World".into())
            }
            Err(WorldError::BlockOutOfRange(pos)) => {
                Some(format!("Block Placement Is Out Of Range {pos}"))
            }
            Err(e) => Some(e.to_string()),
        }
    };

    if let Some(reason) = denial {
        debug!(player = %player.username, reason = %reason, "block placement denied");
        // Roll the client's optimistic edit back to the server's truth.
        if let Ok(current) = world.world.read().unwrap().get_block(x, y, z) {
            let id = if player.supports("CustomBlocks", 1) {
                current
            } else {
                catalog.fallback_id(current)
            };
            player.send_packet(ServerPacket::SetBlock {
                x,
                y,
                z,
                block_id: id,
            });
        }
        player.send_message(&format!("&c{reason}&f"));
    }
}

/// Movement: update the session and relay to everyone else in the
/// world. The mover is skipped; echoing a client its own movement only
/// invites rubber-banding.
fn handle_movement(server: &Arc<Server>, player: &Arc<Player>, pos: FixedPos) {
    player.set_pos(pos);
    let Some(world) = player.world_name().and_then(|n| server.worlds.get(&n)) else {
        return;
    };
    let Some(player_id) = player.player_id() else {
        return;
    };
    world.send_world_packet(
        &ServerPacket::PlayerPositionUpdate { player_id, pos },
        &[&player.username],
    );
}

fn handle_chat(server: &Arc<Server>, player: &Arc<Player>, message: String) {
    if let Some(command_line) = message.strip_prefix('/') {
        // Commands run on their own task: an interactive command may
        // wait for this player's next packets, which only the receive
        // loop can deliver.
        let line = command_line.to_string();
        let server = server.clone();
        let player = player.clone();
        tokio::spawn(async move {
            commands::dispatch(server, player, &line).await;
        });
        return;
    }
    let Some(world) = player.world_name().and_then(|n| server.worlds.get(&n)) else {
        return;
    };
    let config = server.config_snapshot();
    let formatted = server.hooks.chat_format.call(&ChatCtx {
        message,
        allow_player_color: config.allow_player_color,
    });
    let color = if config.is_operator(&player.username) {
        &config.operator_chat_color
    } else {
        &config.player_chat_color
    };
    let line = format!("<{color}{}&f> {formatted}", player.display_name);
    world.send_world_message(&line, &[]);
}

/// Tear-down in the order the contract demands: pending waits cancel,
/// the world despawns the player, the global roster forgets them, and
/// only then does the writer close.
fn cleanup(server: &Arc<Server>, player: &Arc<Player>) {
    player.subscriptions.cancel_all();
    if let Some(world) = player.world_name().and_then(|n| server.worlds.get(&n)) {
        world.remove_player(player, server.registries.features.logout_locations);
    }
    server.players.remove(&player.username);
    player.close(None);
}
