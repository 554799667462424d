use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chisel_commands::{
    check_access, parse_args, ArgValue, CommandDef, CommandError, CommandRegistry, CommandSpec,
    ParamKind, ParamSpec,
};
use chisel_protocol::ServerPacket;
use chisel_registry::RegistryError;
use chisel_types::{FixedPos, Username};
use tracing::{info, warn};

use crate::player::Player;
use crate::server::Server;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// The payload stored per command: an async closure over the server.
pub type CommandHandler =
    Arc<dyn Fn(Arc<Server>, Arc<Player>, Vec<ArgValue>) -> BoxFuture<Result<(), CommandError>> + Send + Sync>;

fn handler<F, Fut>(f: F) -> CommandHandler
where
    F: Fn(Arc<Server>, Arc<Player>, Vec<ArgValue>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CommandError>> + Send + 'static,
{
    Arc::new(move |server, player, args| Box::pin(f(server, player, args)))
}

fn usage_err(message: impl Into<String>) -> CommandError {
    CommandError::Usage(message.into())
}

/// Run one `/command` line from a player: resolve, gate, parse, execute.
/// Every failure becomes a red chat line for the invoker.
pub async fn dispatch(server: Arc<Server>, player: Arc<Player>, line: &str) {
    let mut parts = line.split_whitespace();
    let Some(name) = parts.next() else {
        player.send_message("&cError: Unknown Command ''");
        return;
    };
    let tokens: Vec<&str> = parts.collect();
    info!(player = %player.username, command = name, "command received");

    let result = run_command(&server, &player, name, &tokens).await;
    if let Err(e) = result {
        warn!(player = %player.username, command = name, error = %e, "command failed");
        player.send_message(&format!("&cError: {e}"));
    }
}

async fn run_command(
    server: &Arc<Server>,
    player: &Arc<Player>,
    name: &str,
    tokens: &[&str],
) -> Result<(), CommandError> {
    let def = server.registries.commands.resolve(name)?;
    let config = server.config_snapshot();
    let is_op = config.is_operator(&player.username);
    if let Some(warning) = check_access(&def.spec, is_op, &config.disabled_commands)? {
        player.send_message(warning);
    }
    let args = parse_args(&def.spec, tokens, &server.registries.converters)?;
    (def.handler.as_ref())(server.clone(), player.clone(), args).await
}

pub fn register_core_commands(
    registry: &mut CommandRegistry<CommandHandler>,
) -> Result<(), RegistryError> {
    let defs: Vec<CommandDef<CommandHandler>> = vec![
        CommandDef {
            spec: CommandSpec::new("help", "List commands or show one command's usage")
                .activator("h")
                .param(ParamSpec::optional("command", ParamKind::Str)),
            handler: handler(cmd_help),
        },
        CommandDef {
            spec: CommandSpec::new("teleport", "Teleport to block coordinates")
                .activator("tp")
                .param(ParamSpec::required("posX", ParamKind::Int))
                .param(ParamSpec::required("posY", ParamKind::Int))
                .param(ParamSpec::required("posZ", ParamKind::Int)),
            handler: handler(cmd_teleport),
        },
        CommandDef {
            spec: CommandSpec::new("say", "Broadcast a message to your world")
                .param(ParamSpec::required(
                    "message",
                    ParamKind::Greedy(Box::new(ParamKind::Str)),
                )),
            handler: handler(cmd_say),
        },
        CommandDef {
            spec: CommandSpec::new("motd", "Show the server MOTD"),
            handler: handler(cmd_motd),
        },
        CommandDef {
            spec: CommandSpec::new("worlds", "List loaded worlds"),
            handler: handler(cmd_worlds),
        },
        CommandDef {
            spec: CommandSpec::new("goto", "Move to another world")
                .activator("g")
                .param(ParamSpec::required("world", ParamKind::Str)),
            handler: handler(cmd_goto),
        },
        CommandDef {
            spec: CommandSpec::new("seed", "Show the current world's seed"),
            handler: handler(cmd_seed),
        },
        CommandDef {
            spec: CommandSpec::new("reload", "Re-download the current world").op_only(),
            handler: handler(cmd_reload),
        },
        CommandDef {
            spec: CommandSpec::new("op", "Grant operator status")
                .op_only()
                .param(ParamSpec::required("player", ParamKind::Custom("username"))),
            handler: handler(cmd_op),
        },
        CommandDef {
            spec: CommandSpec::new("deop", "Revoke operator status")
                .op_only()
                .param(ParamSpec::required("player", ParamKind::Custom("username"))),
            handler: handler(cmd_deop),
        },
        CommandDef {
            spec: CommandSpec::new("kick", "Disconnect a player")
                .op_only()
                .param(ParamSpec::required("player", ParamKind::Custom("username")))
                .param(ParamSpec::with_default(
                    "reason",
                    ParamKind::Greedy(Box::new(ParamKind::Str)),
                    ArgValue::Str("Kicked By Server".into()),
                )),
            handler: handler(cmd_kick),
        },
        CommandDef {
            spec: CommandSpec::new("ban", "Ban a player by username")
                .op_only()
                .param(ParamSpec::required("player", ParamKind::Custom("username"))),
            handler: handler(cmd_ban),
        },
        CommandDef {
            spec: CommandSpec::new("unban", "Lift a username ban")
                .op_only()
                .param(ParamSpec::required("player", ParamKind::Custom("username"))),
            handler: handler(cmd_unban),
        },
        CommandDef {
            spec: CommandSpec::new("banip", "Ban an IP address")
                .op_only()
                .param(ParamSpec::required("ip", ParamKind::Str)),
            handler: handler(cmd_banip),
        },
        CommandDef {
            spec: CommandSpec::new("cuboid", "Fill a region between two broken corners")
                .activator("cub")
                .activator("z")
                .param(ParamSpec::required("block", ParamKind::Custom("block"))),
            handler: handler(cmd_cuboid),
        },
        CommandDef {
            spec: CommandSpec::new("save", "Save all persistent worlds").op_only(),
            handler: handler(cmd_save),
        },
    ];
    for def in defs {
        registry.register(def, false)?;
    }
    Ok(())
}

/// Registered by the click-distance module, not the core set.
pub fn register_click_distance_command(
    registry: &mut CommandRegistry<CommandHandler>,
) -> Result<(), RegistryError> {
    registry.register(
        CommandDef {
            spec: CommandSpec::new("clickdistance", "Show or set this world's click distance")
                .op_only()
                .param(ParamSpec::optional("distance", ParamKind::Int)),
            handler: handler(cmd_click_distance),
        },
        false,
    )
}

fn current_world(
    server: &Arc<Server>,
    player: &Arc<Player>,
) -> Result<Arc<crate::worlds::ServerWorld>, CommandError> {
    player
        .world_name()
        .and_then(|name| server.worlds.get(&name))
        .ok_or_else(|| usage_err("You Are Not In A World"))
}

async fn cmd_help(
    server: Arc<Server>,
    player: Arc<Player>,
    args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    match args[0].as_str() {
        Some(name) => {
            let def = server.registries.commands.resolve(name)?;
            player.send_message(&format!("&e{}&f - {}", def.spec.usage(), def.spec.description));
        }
        None => {
            player.send_message("&e=== Commands ===&f");
            for def in server.registries.commands.iter() {
                player.send_message(&format!("&b/{}&f - {}", def.spec.name, def.spec.description));
            }
        }
    }
    Ok(())
}

async fn cmd_teleport(
    server: Arc<Server>,
    player: Arc<Player>,
    args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    let (x, y, z) = (
        args[0].as_int().expect("typed by parser"),
        args[1].as_int().expect("typed by parser"),
        args[2].as_int().expect("typed by parser"),
    );
    let world = current_world(&server, &player)?;
    {
        let map = world.world.read().unwrap();
        if x < 0
            || y < 0
            || z < 0
            || x as u32 >= map.size_x as u32
            || y as u32 >= map.size_y as u32
            || z as u32 >= map.size_z as u32
        {
            return Err(usage_err(format!("({x}, {y}, {z}) Is Out Of Bounds")));
        }
    }
    let pos = FixedPos::from_block(x as i16, y as i16, z as i16);
    server.set_location(&player, &world, pos, true);
    Ok(())
}

async fn cmd_say(
    server: Arc<Server>,
    player: Arc<Player>,
    args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    let message = args[0].as_str().expect("typed by parser");
    let world = current_world(&server, &player)?;
    world.send_world_message(&format!("&7[Server]&f {message}"), &[]);
    Ok(())
}

async fn cmd_motd(
    server: Arc<Server>,
    player: Arc<Player>,
    _args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    for line in server.config_snapshot().default_motd {
        player.send_message(&line);
    }
    Ok(())
}

async fn cmd_worlds(
    server: Arc<Server>,
    player: Arc<Player>,
    _args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    let names = server.worlds.names();
    player.send_message(&format!("&e=== Worlds ({}) ===&f", names.len()));
    for name in names {
        if let Some(world) = server.worlds.get(&name) {
            player.send_message(&format!("&b{name}&f - {} Players", world.player_count()));
        }
    }
    Ok(())
}

async fn cmd_goto(
    server: Arc<Server>,
    player: Arc<Player>,
    args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    let name = args[0].as_str().expect("typed by parser");
    let target = server
        .worlds
        .get(name)
        .ok_or_else(|| usage_err(format!("World '{name}' Not Found")))?;
    if player.world_name().as_deref() == Some(target.name.as_str()) {
        return Err(usage_err(format!("You Are Already In '{name}'")));
    }
    server
        .change_world(&player, &target)
        .map_err(|e| usage_err(e.0))?;
    Ok(())
}

async fn cmd_seed(
    server: Arc<Server>,
    player: Arc<Player>,
    _args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    let world = current_world(&server, &player)?;
    let seed = world.world.read().unwrap().seed;
    player.send_message(&format!("&eWorld Seed: &b{seed}&f"));
    Ok(())
}

async fn cmd_reload(
    server: Arc<Server>,
    player: Arc<Player>,
    _args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    let world = current_world(&server, &player)?;
    let config = server.config_snapshot();
    world.reload_for(&player, &config, &server.registries.blocks);
    player.send_message("&aWorld Reloaded!");
    Ok(())
}

async fn cmd_op(
    server: Arc<Server>,
    player: Arc<Player>,
    args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    let target = parse_username(&args[0])?;
    let added = server.with_config(|config| {
        if config.operators_list.contains(&target) {
            false
        } else {
            config.operators_list.push(target.clone());
            true
        }
    });
    if !added {
        return Err(usage_err(format!("{target} Is Already An Operator")));
    }
    server.sync_operator_status(&target, true);
    player.send_message(&format!("&a{target} Is Now An Operator"));
    Ok(())
}

async fn cmd_deop(
    server: Arc<Server>,
    player: Arc<Player>,
    args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    let target = parse_username(&args[0])?;
    let removed = server.with_config(|config| {
        let before = config.operators_list.len();
        config.operators_list.retain(|u| u != &target);
        config.operators_list.len() != before
    });
    if !removed {
        return Err(usage_err(format!("{target} Is Not An Operator")));
    }
    server.sync_operator_status(&target, true);
    player.send_message(&format!("&a{target} Is No Longer An Operator"));
    Ok(())
}

async fn cmd_kick(
    server: Arc<Server>,
    player: Arc<Player>,
    args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    let target = parse_username(&args[0])?;
    let reason = args[1].as_str().unwrap_or("Kicked By Server").to_string();
    if server.players.kick(&target, &reason) {
        player.send_message(&format!("&a{target} Was Kicked"));
        Ok(())
    } else {
        Err(usage_err(format!("Player '{target}' Is Not Online")))
    }
}

async fn cmd_ban(
    server: Arc<Server>,
    player: Arc<Player>,
    args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    let target = parse_username(&args[0])?;
    server.with_config(|config| {
        if !config.banned_players.contains(&target) {
            config.banned_players.push(target.clone());
        }
    });
    server.players.kick(&target, "You are banned.");
    player.send_message(&format!("&a{target} Was Banned"));
    Ok(())
}

async fn cmd_unban(
    server: Arc<Server>,
    player: Arc<Player>,
    args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    let target = parse_username(&args[0])?;
    let removed = server.with_config(|config| {
        let before = config.banned_players.len();
        config.banned_players.retain(|u| u != &target);
        config.banned_players.len() != before
    });
    if !removed {
        return Err(usage_err(format!("{target} Is Not Banned")));
    }
    player.send_message(&format!("&a{target} Was Unbanned"));
    Ok(())
}

async fn cmd_banip(
    server: Arc<Server>,
    player: Arc<Player>,
    args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    let ip = args[0].as_str().expect("typed by parser").to_string();
    server.with_config(|config| {
        if !config.banned_ips.contains(&ip) {
            config.banned_ips.push(ip.clone());
        }
    });
    let kicked = server.players.kick_ip(&ip, "You are banned.");
    player.send_message(&format!("&aBanned {ip} ({kicked} Players Kicked)"));
    Ok(())
}

const CUBOID_MAX_BLOCKS: usize = 32_768;

/// Interactive: consumes the player's next two block updates as corner
/// picks, then fills the region through the bulk-update pipeline.
async fn cmd_cuboid(
    server: Arc<Server>,
    player: Arc<Player>,
    args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    let block_id = args[0].as_int().expect("typed by parser") as u8;
    let world = current_world(&server, &player)?;
    let config = server.config_snapshot();

    player.send_message("&aPlease Break The First Corner");
    let first = next_corner_pick(&server, &player, &world).await?;
    player.send_message("&aPlease Break The Second Corner");
    let second = next_corner_pick(&server, &player, &world).await?;

    let (x0, x1) = (first.x.min(second.x), first.x.max(second.x));
    let (y0, y1) = (first.y.min(second.y), first.y.max(second.y));
    let (z0, z1) = (first.z.min(second.z), first.z.max(second.z));
    let count =
        (x1 - x0 + 1) as usize * (y1 - y0 + 1) as usize * (z1 - z0 + 1) as usize;
    if count > CUBOID_MAX_BLOCKS {
        return Err(usage_err(format!(
            "Cuboid Too Large ({count} Blocks, Max {CUBOID_MAX_BLOCKS})"
        )));
    }

    let mut updates = Vec::with_capacity(count);
    for y in y0..=y1 {
        for z in z0..=z1 {
            for x in x0..=x1 {
                updates.push((chisel_types::BlockPos::new(x, y, z), block_id));
            }
        }
    }
    world
        .bulk_block_update(updates, true, &config, &server.registries.blocks)
        .await
        .map_err(|e| usage_err(e.to_string()))?;
    player.send_message(&format!("&aFilled {count} Blocks"));
    Ok(())
}

/// Wait for the player's next block update, treating it as a selection:
/// the client's optimistic edit is reverted and the normal placement
/// handler is skipped.
async fn next_corner_pick(
    server: &Arc<Server>,
    player: &Arc<Player>,
    world: &Arc<crate::worlds::ServerWorld>,
) -> Result<chisel_types::BlockPos, CommandError> {
    let packet = player
        .next_packet(0x05, std::time::Duration::from_secs(30), false, None)
        .await
        .map_err(|_| usage_err("Timed Out Waiting For A Corner Selection"))?;
    let chisel_protocol::ClientPacket::UpdateBlock { x, y, z, .. } = packet else {
        return Err(usage_err("Unexpected Packet While Selecting A Corner"));
    };
    // Put the client's view back to the authoritative block.
    if let Ok(current) = world.world.read().unwrap().get_block(x, y, z) {
        let id = if player.supports("CustomBlocks", 1) {
            current
        } else {
            server.registries.blocks.fallback_id(current)
        };
        player.send_packet(ServerPacket::SetBlock {
            x,
            y,
            z,
            block_id: id,
        });
    }
    Ok(chisel_types::BlockPos::new(x, y, z))
}

async fn cmd_save(
    server: Arc<Server>,
    player: Arc<Player>,
    _args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    let config = server.config_snapshot();
    let saved = server.worlds.save_all(&server.registries, &config);
    player.send_message(&format!("&aSaved {saved} Worlds"));
    Ok(())
}

async fn cmd_click_distance(
    server: Arc<Server>,
    player: Arc<Player>,
    args: Vec<ArgValue>,
) -> Result<(), CommandError> {
    let world = current_world(&server, &player)?;
    match args[0].as_int() {
        None => {
            // Prefer the value applied to this session, else the
            // world's persisted record, else the protocol default.
            let current = player
                .ext
                .get::<i32>("click_distance")
                .map(i64::from)
                .or_else(|| {
                    world
                        .world
                        .read()
                        .unwrap()
                        .metadata
                        .get(crate::worlds::METADATA_SOFTWARE, "clickDistance")
                        .and_then(|v| v.get("distance"))
                        .and_then(serde_json::Value::as_i64)
                })
                .unwrap_or(160);
            player.send_message(&format!("&eClick Distance: &b{current}&f"));
        }
        Some(distance) => {
            if !(0..=i16::MAX as i32).contains(&distance) {
                return Err(usage_err("Distance Must Fit In A Signed Short"));
            }
            world.world.write().unwrap().metadata.insert(
                crate::worlds::METADATA_SOFTWARE,
                "clickDistance",
                serde_json::json!({ "version": 1, "distance": distance }),
            );
            for member in world.players() {
                if member.supports("ClickDistance", 1) {
                    member.send_packet(ServerPacket::SetClickDistance {
                        distance: distance as i16,
                    });
                }
                member.ext.set("click_distance", distance);
            }
            player.send_message(&format!("&aClick Distance Set To {distance}"));
        }
    }
    Ok(())
}

fn parse_username(arg: &ArgValue) -> Result<Username, CommandError> {
    let raw = arg.as_str().ok_or_else(|| usage_err("Expected A Username"))?;
    Username::new(raw).map_err(|e| usage_err(format!("Invalid Username: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Outbound;
    use crate::testutil::{drain, test_player, test_server};

    async fn join_and_drain(
        harness: &crate::testutil::TestHarness,
        name: &str,
    ) -> (
        Arc<Player>,
        tokio::sync::mpsc::UnboundedReceiver<Outbound>,
    ) {
        let (player, mut rx) = test_player(name, &[]);
        let world = harness.server.default_world().unwrap();
        let config = harness.server.config_snapshot();
        world.join_player(&player, &config, None).unwrap();
        harness
            .server
            .players
            .add(player.clone(), config.server_max_players)
            .unwrap();
        drain(&mut rx);
        (player, rx)
    }

    fn messages(packets: &[ServerPacket]) -> Vec<String> {
        packets
            .iter()
            .filter_map(|p| match p {
                ServerPacket::Message { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_teleport_moves_and_broadcasts() {
        let harness = test_server(|c| c.default_world_size = crate::config::WorldSize {
            x: 64,
            y: 64,
            z: 64,
        });
        let (alex, mut alex_rx) = join_and_drain(&harness, "alex").await;
        let (bea, mut bea_rx) = join_and_drain(&harness, "bea").await;
        drain(&mut alex_rx);

        dispatch(harness.server.clone(), alex.clone(), "teleport 10 20 30").await;
        let expected = FixedPos::new(10 * 32 + 16, 20 * 32 + 51, 30 * 32 + 16, 0, 0);
        assert_eq!(alex.pos(), expected);

        // The actor sees the update under the self id; peers under the
        // actor's world id.
        let alex_packets = drain(&mut alex_rx);
        assert!(alex_packets.iter().any(|p| matches!(
            p,
            ServerPacket::PlayerPositionUpdate { player_id: 0xFF, pos } if *pos == expected
        )));
        let bea_packets = drain(&mut bea_rx);
        let alex_id = alex.player_id().unwrap();
        assert!(bea_packets.iter().any(|p| matches!(
            p,
            ServerPacket::PlayerPositionUpdate { player_id, pos }
                if *player_id == alex_id && *pos == expected
        )));
        let _ = bea;
    }

    #[tokio::test]
    async fn test_teleport_missing_argument_message() {
        let harness = test_server(|_| {});
        let (alex, mut rx) = join_and_drain(&harness, "alex").await;
        dispatch(harness.server.clone(), alex, "teleport 10 20").await;
        let lines = messages(&drain(&mut rx));
        assert!(lines
            .iter()
            .any(|m| m.contains("Expected Field 'posZ' But Got Nothing")));
    }

    #[tokio::test]
    async fn test_teleport_too_many_arguments() {
        let harness = test_server(|_| {});
        let (alex, mut rx) = join_and_drain(&harness, "alex").await;
        dispatch(harness.server.clone(), alex, "tp 1 2 3 4").await;
        let lines = messages(&drain(&mut rx));
        assert!(lines.iter().any(|m| m.contains("Too Many Arguments")));
    }

    #[tokio::test]
    async fn test_unknown_command_message() {
        let harness = test_server(|_| {});
        let (alex, mut rx) = join_and_drain(&harness, "alex").await;
        dispatch(harness.server.clone(), alex, "warpspeed now").await;
        let lines = messages(&drain(&mut rx));
        assert!(lines.iter().any(|m| m.contains("Unknown Command 'warpspeed'")));
    }

    #[tokio::test]
    async fn test_op_gating_and_disabled_commands() {
        let harness = test_server(|c| c.disabled_commands.push("seed".into()));
        let (alex, mut rx) = join_and_drain(&harness, "alex").await;

        dispatch(harness.server.clone(), alex.clone(), "kick alex").await;
        let lines = messages(&drain(&mut rx));
        assert!(lines.iter().any(|m| m.contains("You Are Not An Operator!")));

        dispatch(harness.server.clone(), alex.clone(), "seed").await;
        let lines = messages(&drain(&mut rx));
        assert!(lines.iter().any(|m| m.contains("This Command Is Disabled!")));
    }

    #[tokio::test]
    async fn test_op_command_persists_and_notifies() {
        let harness = test_server(|c| {
            c.operators_list.push(chisel_types::Username::new("admin").unwrap())
        });
        let (admin, mut admin_rx) = join_and_drain(&harness, "admin").await;
        let (alex, mut alex_rx) = join_and_drain(&harness, "alex").await;
        drain(&mut admin_rx);

        dispatch(harness.server.clone(), admin.clone(), "op alex").await;
        assert!(harness.server.is_operator(&alex.username));

        let alex_packets = drain(&mut alex_rx);
        assert!(alex_packets
            .iter()
            .any(|p| matches!(p, ServerPacket::UpdateUserType { is_op: true })));
        let lines = messages(&alex_packets);
        assert!(lines.iter().any(|m| m.contains("You Are Now An Operator")));

        dispatch(harness.server.clone(), admin, "deop alex").await;
        assert!(!harness.server.is_operator(&alex.username));
        let alex_packets = drain(&mut alex_rx);
        assert!(alex_packets
            .iter()
            .any(|p| matches!(p, ServerPacket::UpdateUserType { is_op: false })));
    }

    #[tokio::test]
    async fn test_ban_kicks_and_persists() {
        let harness = test_server(|c| {
            c.operators_list.push(chisel_types::Username::new("admin").unwrap())
        });
        let (admin, _admin_rx) = join_and_drain(&harness, "admin").await;
        let (alex, mut alex_rx) = join_and_drain(&harness, "alex").await;
        drain(&mut alex_rx);

        dispatch(harness.server.clone(), admin, "ban alex").await;
        let config = harness.server.config_snapshot();
        assert!(config.is_banned(&alex.username));
        let alex_packets = drain(&mut alex_rx);
        assert!(alex_packets.iter().any(|p| matches!(
            p,
            ServerPacket::DisconnectPlayer { reason } if reason == "You are banned."
        )));
    }

    #[tokio::test]
    async fn test_help_lists_registered_commands() {
        let harness = test_server(|_| {});
        let (alex, mut rx) = join_and_drain(&harness, "alex").await;
        dispatch(harness.server.clone(), alex.clone(), "help").await;
        let lines = messages(&drain(&mut rx));
        assert!(lines.iter().any(|m| m.contains("/teleport")));
        assert!(lines.iter().any(|m| m.contains("/clickdistance")));

        dispatch(harness.server.clone(), alex, "help teleport").await;
        let lines = messages(&drain(&mut rx));
        assert!(lines
            .iter()
            .any(|m| m.contains("/teleport <posX> <posY> <posZ>")));
    }
}
