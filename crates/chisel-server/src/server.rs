use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chisel_protocol::ServerPacket;
use chisel_types::{FixedPos, Username};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::hooks::ServerHooks;
use crate::modules::{self, Registries};
use crate::network;
use crate::player::{ClientError, Player, PlayerManager};
use crate::tasks;
use crate::worlds::{ServerWorld, WorldManager};

/// The composition root: config, registries, hooks, managers, and the
/// listener lifecycle.
pub struct Server {
    config: RwLock<ServerConfig>,
    config_path: PathBuf,
    pub registries: Registries,
    pub hooks: ServerHooks,
    pub players: PlayerManager,
    pub worlds: WorldManager,
    pub shutdown: watch::Sender<bool>,
}

impl Server {
    /// Build everything up to (but not including) the listener: module
    /// graph, registries, hooks, and the world set.
    pub fn bootstrap(config: ServerConfig, config_path: PathBuf) -> anyhow::Result<Arc<Self>> {
        let (registries, hooks) = modules::initialize(&config)?;
        let worlds = WorldManager::new(config.world_save_location.clone().map(PathBuf::from));
        worlds.load_worlds(&registries, &config)?;
        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(Self {
            config: RwLock::new(config),
            config_path,
            registries,
            hooks,
            players: PlayerManager::new(),
            worlds,
            shutdown,
        }))
    }

    /// Reads see a cloned snapshot; config mutation is rare (admin
    /// commands) and goes through [`Server::with_config`].
    pub fn config_snapshot(&self) -> ServerConfig {
        self.config.read().unwrap().clone()
    }

    /// Mutate the config and persist it via write-replace.
    pub fn with_config<R>(&self, mutate: impl FnOnce(&mut ServerConfig) -> R) -> R {
        let (result, snapshot) = {
            let mut config = self.config.write().unwrap();
            let result = mutate(&mut config);
            (result, config.clone())
        };
        if let Err(e) = snapshot.save(&self.config_path) {
            error!(error = %e, "failed to persist config");
        }
        result
    }

    pub fn is_operator(&self, username: &Username) -> bool {
        self.config.read().unwrap().is_operator(username)
    }

    /// Push the (possibly changed) op status to a connected player.
    pub fn sync_operator_status(&self, username: &Username, send_message: bool) {
        let Some(player) = self.players.get(username) else {
            return;
        };
        let is_op = self.is_operator(username);
        player.send_packet(ServerPacket::UpdateUserType { is_op });
        if send_message {
            player.send_message(if is_op {
                "You Are Now An Operator"
            } else {
                "You Are No Longer An Operator"
            });
        }
    }

    pub fn default_world(&self) -> Option<Arc<ServerWorld>> {
        let name = self.config.read().unwrap().default_world.clone();
        self.worlds.get(&name)
    }

    /// Stream the level and run the join sequence, honoring a saved
    /// logout location when that module is enabled.
    pub fn join_world(
        &self,
        player: &Arc<Player>,
        world: &Arc<ServerWorld>,
    ) -> Result<(), ClientError> {
        let config = self.config_snapshot();
        world
            .send_level_to(player, &config, &self.registries.blocks)
            .map_err(|e| ClientError::new(format!("World Transfer Failed: {e}")))?;
        let spawn_override = if self.registries.features.logout_locations {
            world.logout_location(&player.username)
        } else {
            None
        };
        world.join_player(player, &config, spawn_override)?;
        Ok(())
    }

    /// Inter-world transfer: leave the old room, stream the new level,
    /// join the new room.
    pub fn change_world(
        &self,
        player: &Arc<Player>,
        target: &Arc<ServerWorld>,
    ) -> Result<(), ClientError> {
        player.send_message(&format!("&eWhisking You Off To &b{}&e...", target.name));
        if let Some(old_name) = player.world_name() {
            if let Some(old) = self.worlds.get(&old_name) {
                old.remove_player(player, self.registries.features.logout_locations);
            }
        }
        self.join_world(player, target)
    }

    /// Authoritative teleport. The subject sees the update under the
    /// self id; everyone else under the world id.
    pub fn set_location(
        &self,
        player: &Arc<Player>,
        world: &Arc<ServerWorld>,
        pos: FixedPos,
        notify: bool,
    ) {
        player.set_pos(pos);
        if !notify {
            return;
        }
        let Some(player_id) = player.player_id() else {
            return;
        };
        world.send_world_packet_about(
            &player.username,
            &ServerPacket::PlayerPositionUpdate { player_id, pos },
            &[],
        );
    }

    /// Bind, spawn background tasks, and accept until shutdown.
    pub async fn run(self: &Arc<Self>) -> anyhow::Result<()> {
        let config = self.config_snapshot();
        let addr = format!("{}:{}", config.address, config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(
            addr = %addr,
            server = %config.server_name,
            max_players = config.server_max_players,
            "listening"
        );

        tokio::spawn(tasks::keepalive(self.clone()));
        tokio::spawn(tasks::periodic_save(self.clone()));

        let ctrlc_tx = self.shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            let _ = ctrlc_tx.send(true);
        });

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = self.clone();
                        tokio::spawn(async move {
                            network::handle_connection(server, stream, peer).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                _ = shutdown_rx.changed() => break,
            }
        }

        self.stop();
        Ok(())
    }

    /// Drain: disconnect every client, then save every persistent world.
    pub fn stop(&self) {
        info!("server stopping");
        self.players
            .send_global_message("&cServer Is Shutting Down", &[]);
        for player in self.players.players() {
            player.close(Some("Server Closed"));
        }
        let config = self.config_snapshot();
        let saved = self.worlds.save_all(&self.registries, &config);
        info!(saved, "worlds saved, goodbye");
    }
}
