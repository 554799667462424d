use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use chisel_blocks::BlockCatalog;
use chisel_protocol::{ServerPacket, LEVEL_CHUNK_LEN};
use chisel_types::{BlockPos, FixedPos, Username, SELF_PLAYER_ID};
use chisel_world::{gzip_level_stream, Actor, World, WorldError};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::modules::Registries;
use crate::player::{ClientError, Player};

pub const METADATA_SOFTWARE: &str = "chisel";
pub const LOGOUT_LOCATIONS_KEY: &str = "logoutLocations";

/// A world plus the players currently inside it. The inner `World` is
/// pure map state; everything network-facing lives here so broadcast
/// order matches in-memory write order.
pub struct ServerWorld {
    pub name: String,
    pub world: RwLock<World>,
    slots: Mutex<Vec<Option<Arc<Player>>>>,
    /// Serializes bulk updates per world; per-block writes take the map
    /// write lock directly.
    bulk_lock: tokio::sync::Mutex<()>,
}

/// World player ids live in [0, 126]; 127 slots at most. 255 is the
/// self id and the range above 126 is reserved by the protocol.
const MAX_WORLD_SLOTS: usize = 127;

impl ServerWorld {
    pub fn new(world: World, max_players: usize) -> Self {
        Self {
            name: world.name.clone(),
            world: RwLock::new(world),
            slots: Mutex::new(vec![None; max_players.min(MAX_WORLD_SLOTS)]),
            bulk_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn players(&self) -> Vec<Arc<Player>> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    pub fn player_count(&self) -> usize {
        self.slots.lock().unwrap().iter().flatten().count()
    }

    /// Lowest-free-slot id allocator; frees restore the initial state.
    fn allocate_slot(&self, player: &Arc<Player>) -> Option<u8> {
        let mut slots = self.slots.lock().unwrap();
        let index = slots.iter().position(Option::is_none)?;
        slots[index] = Some(player.clone());
        Some(index as u8)
    }

    fn free_slot(&self, player_id: u8) {
        let mut slots = self.slots.lock().unwrap();
        match slots.get_mut(player_id as usize) {
            Some(slot) if slot.is_some() => *slot = None,
            _ => error!(world = %self.name, player_id, "freeing unallocated id"),
        }
    }

    /// Fan a packet out to everyone here. Per-recipient send failures
    /// are logged and skipped.
    pub fn send_world_packet(&self, packet: &ServerPacket, ignore: &[&Username]) {
        for player in self.players() {
            if ignore.contains(&&player.username) {
                continue;
            }
            if !player.send_packet(packet.clone()) {
                warn!(player = %player.username, world = %self.name, "world send failed, skipping");
            }
        }
    }

    /// Like `send_world_packet`, but the packet is *about* a player:
    /// when it reaches that player, the id is rewritten to the 0xFF
    /// self id the client expects for its own entity.
    pub fn send_world_packet_about(
        &self,
        subject: &Username,
        packet: &ServerPacket,
        ignore: &[&Username],
    ) {
        for player in self.players() {
            if ignore.contains(&&player.username) {
                continue;
            }
            let personalized = if &player.username == subject {
                rewrite_self_id(packet)
            } else {
                packet.clone()
            };
            player.send_packet(personalized);
        }
    }

    pub fn send_world_message(&self, message: &str, ignore: &[&Username]) {
        info!(world = %self.name, message, "world message");
        for player in self.players() {
            if ignore.contains(&&player.username) {
                continue;
            }
            player.send_message(message);
        }
    }

    /// Stream the level to one player: initialize, gzipped chunks with
    /// progress, finalize. CPE blocks are degraded to their fallbacks
    /// for clients without CustomBlocks.
    pub fn send_level_to(
        &self,
        player: &Arc<Player>,
        config: &ServerConfig,
        catalog: &BlockCatalog,
    ) -> Result<(), WorldError> {
        let supports_custom = player.supports("CustomBlocks", 1);
        let (stream, size_x, size_y, size_z) = {
            let world = self.world.read().unwrap();
            let stream = if supports_custom {
                gzip_level_stream(world.map(), config.gzip_compression_level, true)?
            } else {
                let translated: Vec<u8> =
                    world.map().iter().map(|&b| catalog.fallback_id(b)).collect();
                gzip_level_stream(&translated, config.gzip_compression_level, true)?
            };
            (stream, world.size_x, world.size_y, world.size_z)
        };

        debug!(
            player = %player.username,
            world = %self.name,
            bytes = stream.len(),
            "sending level"
        );
        player.send_packet(ServerPacket::LevelInitialize);
        let total = stream.len();
        let mut sent = 0usize;
        for chunk in stream.chunks(LEVEL_CHUNK_LEN) {
            sent += chunk.len();
            player.send_packet(ServerPacket::LevelDataChunk {
                data: chunk.to_vec(),
                percent: ((sent * 100) / total) as u8,
            });
        }
        player.send_packet(ServerPacket::LevelFinalize {
            x: size_x as i16,
            y: size_y as i16,
            z: size_z as i16,
        });
        Ok(())
    }

    /// Join sequence: allocate an id, place the player, announce them to
    /// the room before they get their snapshot of it.
    pub fn join_player(
        self: &Arc<Self>,
        player: &Arc<Player>,
        config: &ServerConfig,
        spawn_override: Option<FixedPos>,
    ) -> Result<u8, ClientError> {
        let player_id = self
            .allocate_slot(player)
            .ok_or_else(|| ClientError::new(format!("World {} Is Full", self.name)))?;

        let spawn = {
            let mut world = self.world.write().unwrap();
            world.generate_spawn_coords(config.automatically_determine_spawn)
        };
        let pos = spawn_override.unwrap_or(spawn);
        player.enter_world(&self.name, player_id, pos);
        debug!(player = %player.username, world = %self.name, player_id, "player joining");

        // Existing players learn about the joiner first, so nobody can
        // miss them while the snapshot below streams out.
        self.send_world_packet(
            &ServerPacket::SpawnPlayer {
                player_id,
                name: player.display_name.clone(),
                pos,
            },
            &[&player.username],
        );

        // The joiner's own spawn uses the self id, then every player
        // already present.
        player.send_packet(ServerPacket::SpawnPlayer {
            player_id: SELF_PLAYER_ID,
            name: player.display_name.clone(),
            pos,
        });
        for other in self.players() {
            if other.username == player.username {
                continue;
            }
            if let Some(other_id) = other.player_id() {
                player.send_packet(ServerPacket::SpawnPlayer {
                    player_id: other_id,
                    name: other.display_name.clone(),
                    pos: other.pos(),
                });
            }
        }

        self.send_world_message(
            &format!(
                "&e{} Joined The World &9(ID {})&f",
                player.display_name, player_id
            ),
            &[],
        );
        if !self.world.read().unwrap().persistent {
            player.send_message("&cWARNING: This world is Non-Persistent!&f");
            player.send_message("&cAny changes WILL NOT be saved!!&f");
        }
        Ok(player_id)
    }

    /// Leave sequence: despawn for peers, free the slot, announce, and
    /// (when enabled) remember where the player stood for next time.
    pub fn remove_player(&self, player: &Arc<Player>, record_logout: bool) {
        let Some(player_id) = player.player_id() else {
            error!(player = %player.username, "removing player with no world id");
            return;
        };
        self.free_slot(player_id);
        player.leave_world();

        if record_logout {
            let pos = player.pos();
            let mut world = self.world.write().unwrap();
            let mut record = world
                .metadata
                .get(METADATA_SOFTWARE, LOGOUT_LOCATIONS_KEY)
                .cloned()
                .unwrap_or_else(|| json!({ "version": 1, "locations": {} }));
            record["locations"][player.username.as_str()] = json!({
                "x": pos.x, "y": pos.y, "z": pos.z,
                "yaw": pos.yaw, "pitch": pos.pitch,
            });
            world
                .metadata
                .insert(METADATA_SOFTWARE, LOGOUT_LOCATIONS_KEY, record);
        }

        self.send_world_packet(
            &ServerPacket::DespawnPlayer { player_id },
            &[&player.username],
        );
        self.send_world_message(
            &format!(
                "&e{} Left The World &9(ID {})&f",
                player.display_name, player_id
            ),
            &[],
        );
    }

    /// Saved logout location for a player, if the world carries one.
    pub fn logout_location(&self, username: &Username) -> Option<FixedPos> {
        let world = self.world.read().unwrap();
        let record = world.metadata.get(METADATA_SOFTWARE, LOGOUT_LOCATIONS_KEY)?;
        let entry = record.get("locations")?.get(username.as_str())?;
        Some(FixedPos::new(
            entry.get("x")?.as_i64()? as i16,
            entry.get("y")?.as_i64()? as i16,
            entry.get("z")?.as_i64()? as i16,
            entry.get("yaw")?.as_i64()? as u8,
            entry.get("pitch")?.as_i64()? as u8,
        ))
    }

    /// Authoritative single-block write plus broadcast. The caller has
    /// already run the placement checks.
    pub fn set_block(
        &self,
        x: i16,
        y: i16,
        z: i16,
        block_id: u8,
        actor: Option<Actor>,
        catalog: &BlockCatalog,
    ) -> Result<(), WorldError> {
        self.world
            .write()
            .unwrap()
            .set_block(x, y, z, block_id, actor)?;
        self.broadcast_set_block(x, y, z, block_id, catalog);
        Ok(())
    }

    fn broadcast_set_block(&self, x: i16, y: i16, z: i16, block_id: u8, catalog: &BlockCatalog) {
        for player in self.players() {
            let id = if player.supports("CustomBlocks", 1) {
                block_id
            } else {
                catalog.fallback_id(block_id)
            };
            player.send_packet(ServerPacket::SetBlock { x, y, z, block_id: id });
        }
    }

    /// The bulk-update contract: validate-then-write atomically, then
    /// either trigger a full reload (past the configured threshold) or
    /// fan out 0x26 chunks / individual SetBlocks depending on each
    /// recipient's negotiated extensions.
    pub async fn bulk_block_update(
        self: &Arc<Self>,
        updates: Vec<(BlockPos, u8)>,
        send_packet: bool,
        config: &ServerConfig,
        catalog: &BlockCatalog,
    ) -> Result<(), WorldError> {
        if updates.is_empty() {
            return Ok(());
        }
        let _guard = self.bulk_lock.lock().await;

        let chunks = {
            let mut world = self.world.write().unwrap();
            world.apply_bulk(&updates)?;
            world.bulk_chunks(&updates)?
        };
        if !send_packet {
            return Ok(());
        }

        let threshold = config.block_updates_before_reload;
        if threshold > 0 && updates.len() > threshold {
            debug!(
                world = %self.name,
                count = updates.len(),
                threshold,
                "bulk update past reload threshold, retransferring level"
            );
            for player in self.players() {
                self.reload_for(&player, config, catalog);
            }
            return Ok(());
        }

        let mut bulk_players = Vec::new();
        let mut single_players = Vec::new();
        for player in self.players() {
            if player.supports("BulkBlockUpdate", 1) {
                bulk_players.push(player);
            } else {
                single_players.push(player);
            }
        }

        for chunk in &chunks {
            if config.asynchronous_block_updates {
                tokio::task::yield_now().await;
            }
            for player in &bulk_players {
                let block_ids = if player.supports("CustomBlocks", 1) {
                    chunk.block_ids.clone()
                } else {
                    chunk.block_ids.iter().map(|&b| catalog.fallback_id(b)).collect()
                };
                player.send_packet(ServerPacket::BulkBlockUpdate {
                    indices: chunk.indices.clone(),
                    block_ids,
                });
            }
        }

        if !single_players.is_empty() {
            for (pos, block_id) in &updates {
                if config.asynchronous_block_updates {
                    tokio::task::yield_now().await;
                }
                for player in &single_players {
                    let id = if player.supports("CustomBlocks", 1) {
                        *block_id
                    } else {
                        catalog.fallback_id(*block_id)
                    };
                    player.send_packet(ServerPacket::SetBlock {
                        x: pos.x,
                        y: pos.y,
                        z: pos.z,
                        block_id: id,
                    });
                }
            }
        }
        Ok(())
    }

    /// Re-send the whole level to one player, put them back where they
    /// stand, and respawn everyone else for them.
    pub fn reload_for(&self, player: &Arc<Player>, config: &ServerConfig, catalog: &BlockCatalog) {
        if let Err(e) = self.send_level_to(player, config, catalog) {
            warn!(player = %player.username, error = %e, "level reload failed");
            return;
        }
        let pos = player.pos();
        player.send_packet(ServerPacket::PlayerPositionUpdate {
            player_id: SELF_PLAYER_ID,
            pos,
        });
        for other in self.players() {
            if other.username == player.username {
                continue;
            }
            if let Some(other_id) = other.player_id() {
                player.send_packet(ServerPacket::SpawnPlayer {
                    player_id: other_id,
                    name: other.display_name.clone(),
                    pos: other.pos(),
                });
            }
        }
    }
}

/// Rewrite the subject id in a packet addressed to the subject itself.
fn rewrite_self_id(packet: &ServerPacket) -> ServerPacket {
    match packet {
        ServerPacket::SpawnPlayer { name, pos, .. } => ServerPacket::SpawnPlayer {
            player_id: SELF_PLAYER_ID,
            name: name.clone(),
            pos: *pos,
        },
        ServerPacket::PlayerPositionUpdate { pos, .. } => ServerPacket::PlayerPositionUpdate {
            player_id: SELF_PLAYER_ID,
            pos: *pos,
        },
        other => other.clone(),
    }
}

/// All loaded worlds plus persistence policy.
pub struct WorldManager {
    worlds: RwLock<HashMap<String, Arc<ServerWorld>>>,
    pub save_dir: Option<PathBuf>,
    pub persistent: bool,
}

impl WorldManager {
    pub fn new(save_dir: Option<PathBuf>) -> Self {
        if save_dir.is_none() {
            warn!("no world save location configured, worlds will be non-persistent");
        }
        Self {
            worlds: RwLock::new(HashMap::new()),
            persistent: save_dir.is_some(),
            save_dir,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServerWorld>> {
        self.worlds.read().unwrap().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.worlds.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn add(&self, world: World, max_players: usize) -> Arc<ServerWorld> {
        let server_world = Arc::new(ServerWorld::new(world, max_players));
        self.worlds
            .write()
            .unwrap()
            .insert(server_world.name.clone(), server_world.clone());
        server_world
    }

    /// Load every world file under the save dir, then make sure the
    /// default world exists (generating it if needed).
    pub fn load_worlds(
        &self,
        registries: &Registries,
        config: &ServerConfig,
    ) -> anyhow::Result<()> {
        if let Some(dir) = &self.save_dir {
            std::fs::create_dir_all(dir)?;
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if !path.is_file() {
                    continue;
                }
                let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                    continue;
                };
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if config.world_blacklist.iter().any(|b| b == stem) {
                    info!(world = stem, "skipping blacklisted world");
                    continue;
                }
                let Ok(format) = registries.formats.for_extension(ext) else {
                    continue;
                };
                let data = std::fs::read(&path)?;
                match format.load(&data, stem, &registries.formats) {
                    Ok(mut world) => {
                        world.persistent = self.persistent;
                        info!(
                            world = stem,
                            format = format.name(),
                            size = %format!("{}x{}x{}", world.size_x, world.size_y, world.size_z),
                            "world loaded"
                        );
                        self.add(world, config.world_max_players);
                    }
                    Err(e) => error!(world = stem, error = %e, "failed to load world"),
                }
            }
        }

        if self.get(&config.default_world).is_none() {
            let generator = registries
                .generators
                .require(&config.default_generator)
                .map_err(|e| anyhow::anyhow!("default generator missing: {e}"))?;
            let size = config.default_world_size;
            let seed = rand::random::<i64>();
            let mut world = generator.generate_world(
                &config.default_world,
                size.x,
                size.y,
                size.z,
                seed,
            )?;
            world.persistent = self.persistent;
            world.format_name = Some(config.default_save_format.clone());
            info!(
                world = %config.default_world,
                generator = %config.default_generator,
                "default world generated"
            );
            self.add(world, config.world_max_players);
        }
        Ok(())
    }

    pub fn worlds(&self) -> Vec<Arc<ServerWorld>> {
        self.worlds.read().unwrap().values().cloned().collect()
    }

    /// Save every persistent world; returns how many files were written.
    /// Each write is atomic at the file-replace boundary.
    pub fn save_all(&self, registries: &Registries, config: &ServerConfig) -> usize {
        let mut saved = 0;
        for server_world in self.worlds() {
            match self.save_world(&server_world, registries, config) {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(e) => error!(world = %server_world.name, error = %e, "world save failed"),
            }
        }
        saved
    }

    fn save_world(
        &self,
        server_world: &ServerWorld,
        registries: &Registries,
        config: &ServerConfig,
    ) -> anyhow::Result<bool> {
        let Some(dir) = &self.save_dir else {
            return Ok(false);
        };
        let world = server_world.world.read().unwrap();
        if !world.persistent {
            return Ok(false);
        }
        let format_name = world
            .format_name
            .clone()
            .unwrap_or_else(|| config.default_save_format.clone());
        let format = registries
            .formats
            .get(&format_name)
            .ok_or_else(|| anyhow::anyhow!("unknown save format '{format_name}'"))?;
        let bytes = format.save(&world, &registries.formats)?;
        let ext = format.extensions().first().copied().unwrap_or("dat");
        let path = dir.join(format!("{}.{ext}", world.name));
        drop(world);

        let tmp = path.with_extension(format!("{ext}.tmp"));
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &path)?;
        debug!(world = %server_world.name, path = %path.display(), "world saved");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{count_matching, drain, test_player, test_server};

    fn default_world(harness: &crate::testutil::TestHarness) -> Arc<ServerWorld> {
        harness.server.default_world().unwrap()
    }

    #[test]
    fn test_join_order_and_self_id() {
        let harness = test_server(|_| {});
        let config = harness.server.config_snapshot();
        let world = default_world(&harness);

        let (alex, mut alex_rx) = test_player("alex", &[]);
        let alex_id = world.join_player(&alex, &config, None).unwrap();
        let alex_packets = drain(&mut alex_rx);
        // The joiner's own spawn carries the self id.
        assert!(alex_packets.iter().any(|p| matches!(
            p,
            ServerPacket::SpawnPlayer { player_id: 0xFF, name, .. } if name == "alex"
        )));

        let (bea, mut bea_rx) = test_player("bea", &[]);
        let bea_id = world.join_player(&bea, &config, None).unwrap();
        assert_ne!(alex_id, bea_id);

        // Alex saw Bea spawn under her real id.
        let alex_packets = drain(&mut alex_rx);
        assert!(alex_packets.iter().any(|p| matches!(
            p,
            ServerPacket::SpawnPlayer { player_id, name, .. }
                if *player_id == bea_id && name == "bea"
        )));
        // Bea's snapshot contains herself (0xFF) and Alex (real id).
        let bea_packets = drain(&mut bea_rx);
        assert!(bea_packets.iter().any(|p| matches!(
            p,
            ServerPacket::SpawnPlayer { player_id: 0xFF, name, .. } if name == "bea"
        )));
        assert!(bea_packets.iter().any(|p| matches!(
            p,
            ServerPacket::SpawnPlayer { player_id, name, .. }
                if *player_id == alex_id && name == "alex"
        )));
    }

    #[test]
    fn test_id_allocation_exhausts_and_recovers() {
        let harness = test_server(|c| c.world_max_players = 2);
        let config = harness.server.config_snapshot();
        let world = default_world(&harness);

        let (alex, _rx_a) = test_player("alex", &[]);
        let (bea, _rx_b) = test_player("bea", &[]);
        let (carl, _rx_c) = test_player("carl", &[]);
        assert_eq!(world.join_player(&alex, &config, None).unwrap(), 0);
        assert_eq!(world.join_player(&bea, &config, None).unwrap(), 1);
        assert!(world.join_player(&carl, &config, None).is_err());

        // Leaving frees the slot; the lowest free id is reused.
        world.remove_player(&alex, false);
        assert_eq!(world.join_player(&carl, &config, None).unwrap(), 0);
    }

    #[test]
    fn test_leave_broadcasts_despawn_to_peers_only() {
        let harness = test_server(|_| {});
        let config = harness.server.config_snapshot();
        let world = default_world(&harness);
        let (alex, mut alex_rx) = test_player("alex", &[]);
        let (bea, mut bea_rx) = test_player("bea", &[]);
        world.join_player(&alex, &config, None).unwrap();
        let bea_id = world.join_player(&bea, &config, None).unwrap();
        drain(&mut alex_rx);
        drain(&mut bea_rx);

        world.remove_player(&bea, false);
        let alex_packets = drain(&mut alex_rx);
        assert!(alex_packets
            .iter()
            .any(|p| matches!(p, ServerPacket::DespawnPlayer { player_id } if *player_id == bea_id)));
        let bea_packets = drain(&mut bea_rx);
        assert!(!bea_packets
            .iter()
            .any(|p| matches!(p, ServerPacket::DespawnPlayer { .. })));
    }

    #[test]
    fn test_set_block_broadcasts_with_fallback_translation() {
        let harness = test_server(|_| {});
        let config = harness.server.config_snapshot();
        let world = default_world(&harness);
        let catalog = &harness.server.registries.blocks;
        let (modern, mut modern_rx) = test_player("modern", &[("CustomBlocks", 1)]);
        let (legacy, mut legacy_rx) = test_player("legacy", &[]);
        world.join_player(&modern, &config, None).unwrap();
        world.join_player(&legacy, &config, None).unwrap();
        drain(&mut modern_rx);
        drain(&mut legacy_rx);

        // Block 65 (StoneBrick) falls back to stone for legacy clients.
        world.set_block(1, 1, 1, 65, None, catalog).unwrap();
        assert_eq!(world.world.read().unwrap().get_block(1, 1, 1).unwrap(), 65);

        let modern_packets = drain(&mut modern_rx);
        assert!(modern_packets
            .iter()
            .any(|p| matches!(p, ServerPacket::SetBlock { block_id: 65, .. })));
        let legacy_packets = drain(&mut legacy_rx);
        assert!(legacy_packets
            .iter()
            .any(|p| matches!(p, ServerPacket::SetBlock { block_id: 1, .. })));
    }

    #[tokio::test]
    async fn test_bulk_update_partitions_recipients() {
        let harness = test_server(|c| c.block_updates_before_reload = 100);
        let config = harness.server.config_snapshot();
        let world = default_world(&harness);
        let catalog = &harness.server.registries.blocks;
        let (bulk, mut bulk_rx) = test_player("bulk", &[("BulkBlockUpdate", 1)]);
        let (plain, mut plain_rx) = test_player("plain", &[]);
        world.join_player(&bulk, &config, None).unwrap();
        world.join_player(&plain, &config, None).unwrap();
        drain(&mut bulk_rx);
        drain(&mut plain_rx);

        let mut config = config;
        config.block_updates_before_reload = 1000;
        let updates: Vec<(BlockPos, u8)> = (0..300)
            .map(|i| (BlockPos::new(i % 16, (i / 16) % 16, i / 256), 1u8))
            .collect();
        world
            .bulk_block_update(updates.clone(), true, &config, catalog)
            .await
            .unwrap();

        // Supporter: two 0x26 packets (256 + 44) whose indices decode to
        // the submitted coordinates.
        let bulk_packets = drain(&mut bulk_rx);
        let chunks: Vec<_> = bulk_packets
            .iter()
            .filter_map(|p| match p {
                ServerPacket::BulkBlockUpdate { indices, block_ids } => {
                    Some((indices.clone(), block_ids.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].0.len(), 256);
        assert_eq!(chunks[1].0.len(), 44);
        {
            let map = world.world.read().unwrap();
            let expected = map.linear_index(5, 0, 0).unwrap() as i32;
            assert_eq!(chunks[0].0[5], expected);
        }
        assert_eq!(
            count_matching(&bulk_packets, |p| matches!(p, ServerPacket::SetBlock { .. })),
            0
        );

        // Non-supporter: one SetBlock per update.
        let plain_packets = drain(&mut plain_rx);
        assert_eq!(
            count_matching(&plain_packets, |p| matches!(p, ServerPacket::SetBlock { .. })),
            300
        );
    }

    #[tokio::test]
    async fn test_bulk_update_past_threshold_reloads() {
        let harness = test_server(|c| c.block_updates_before_reload = 100);
        let config = harness.server.config_snapshot();
        let world = default_world(&harness);
        let catalog = &harness.server.registries.blocks;
        let (bulk, mut bulk_rx) = test_player("bulk", &[("BulkBlockUpdate", 1)]);
        let (plain, mut plain_rx) = test_player("plain", &[]);
        world.join_player(&bulk, &config, None).unwrap();
        world.join_player(&plain, &config, None).unwrap();
        drain(&mut bulk_rx);
        drain(&mut plain_rx);

        let updates: Vec<(BlockPos, u8)> = (0..2000)
            .map(|i| (BlockPos::new(i % 16, (i / 16) % 16, (i / 256) % 16), 1u8))
            .collect();
        world
            .bulk_block_update(updates, true, &config, catalog)
            .await
            .unwrap();

        for rx in [&mut bulk_rx, &mut plain_rx] {
            let packets = drain(rx);
            assert!(
                packets
                    .iter()
                    .any(|p| matches!(p, ServerPacket::LevelInitialize)),
                "expected a level retransfer"
            );
            assert!(packets
                .iter()
                .any(|p| matches!(p, ServerPacket::LevelFinalize { .. })));
            assert_eq!(
                count_matching(&packets, |p| matches!(
                    p,
                    ServerPacket::BulkBlockUpdate { .. } | ServerPacket::SetBlock { .. }
                )),
                0
            );
        }
    }

    #[tokio::test]
    async fn test_bulk_update_bad_batch_leaves_map_unchanged() {
        let harness = test_server(|_| {});
        let config = harness.server.config_snapshot();
        let world = default_world(&harness);
        let catalog = &harness.server.registries.blocks;
        let before = world.world.read().unwrap().map().to_vec();
        let updates = vec![
            (BlockPos::new(0, 15, 0), 1u8),
            (BlockPos::new(99, 0, 0), 1u8),
        ];
        assert!(world
            .bulk_block_update(updates, true, &config, catalog)
            .await
            .is_err());
        assert_eq!(world.world.read().unwrap().map(), &before[..]);
    }

    #[test]
    fn test_logout_location_roundtrip() {
        let harness = test_server(|_| {});
        let config = harness.server.config_snapshot();
        let world = default_world(&harness);
        let (alex, _rx) = test_player("alex", &[]);
        world.join_player(&alex, &config, None).unwrap();
        let pos = FixedPos::new(100, 200, 300, 12, 34);
        alex.set_pos(pos);
        world.remove_player(&alex, true);

        assert_eq!(world.logout_location(&alex.username), Some(pos));
        assert_eq!(world.logout_location(&Username::new("bea").unwrap()), None);

        // The next join lands on the recorded spot.
        let (alex2, _rx2) = test_player("alex", &[]);
        world
            .join_player(&alex2, &config, world.logout_location(&alex2.username))
            .unwrap();
        assert_eq!(alex2.pos(), pos);
    }

    #[test]
    fn test_save_all_writes_files_atomically() {
        let harness = test_server(|_| {});
        let config = harness.server.config_snapshot();
        let saved = harness
            .server
            .worlds
            .save_all(&harness.server.registries, &config);
        assert_eq!(saved, 1);
        let dir = std::path::PathBuf::from(config.world_save_location.unwrap());
        let path = dir.join(format!("{}.obw", config.default_world));
        assert!(path.exists());
        // No temp file left behind.
        assert!(!dir.join(format!("{}.obw.tmp", config.default_world)).exists());

        // Reload from disk and confirm the map round-tripped.
        let data = std::fs::read(&path).unwrap();
        let format = harness.server.registries.formats.get("obsidian-world").unwrap();
        let loaded = format
            .load(&data, &config.default_world, &harness.server.registries.formats)
            .unwrap();
        let world = harness.server.default_world().unwrap();
        assert_eq!(loaded.map(), world.world.read().unwrap().map());
    }
}
