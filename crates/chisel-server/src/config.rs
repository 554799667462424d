use std::path::Path;

use chisel_types::Username;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Server configuration, persisted as JSON. Admin commands mutate the
/// in-memory copy and write it back through [`ServerConfig::save`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub server_name: String,
    pub motd: String,
    pub world_save_location: Option<String>,
    pub default_world: String,
    pub server_max_players: usize,
    pub world_max_players: usize,
    pub default_generator: String,
    pub default_world_size: WorldSize,
    pub default_save_format: String,
    pub gzip_compression_level: u32,
    pub world_blacklist: Vec<String>,
    pub module_blacklist: Vec<String>,
    pub operators_list: Vec<Username>,
    pub banned_players: Vec<Username>,
    pub banned_ips: Vec<String>,
    pub disabled_commands: Vec<String>,
    pub disabled_blocks: Vec<u8>,
    pub allow_liquid_placement: bool,
    pub allow_player_color: bool,
    pub asynchronous_block_updates: bool,
    pub block_updates_before_reload: usize,
    pub automatically_determine_spawn: bool,
    pub default_motd: Vec<String>,
    pub operator_chat_color: String,
    pub player_chat_color: String,
    pub save_interval_seconds: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldSize {
    pub x: u16,
    pub y: u16,
    pub z: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".into(),
            port: 25565,
            server_name: "Chisel Server".into(),
            motd: "A Chisel Server".into(),
            world_save_location: Some("worlds".into()),
            default_world: "default".into(),
            server_max_players: 64,
            world_max_players: 32,
            default_generator: "flat".into(),
            default_world_size: WorldSize { x: 64, y: 64, z: 64 },
            default_save_format: "obsidian-world".into(),
            gzip_compression_level: 6,
            world_blacklist: Vec::new(),
            module_blacklist: Vec::new(),
            operators_list: Vec::new(),
            banned_players: Vec::new(),
            banned_ips: Vec::new(),
            disabled_commands: Vec::new(),
            disabled_blocks: Vec::new(),
            allow_liquid_placement: false,
            allow_player_color: true,
            asynchronous_block_updates: true,
            block_updates_before_reload: 2000,
            automatically_determine_spawn: false,
            default_motd: vec!["&aWelcome To The Server!".into()],
            operator_chat_color: "&4".into(),
            player_chat_color: "&a".into(),
            save_interval_seconds: 300,
        }
    }
}

impl ServerConfig {
    /// Load the config, creating the file with defaults when absent.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: ServerConfig = serde_json::from_str(&contents)?;
            Ok(config)
        } else {
            info!("no config file at {}, writing defaults", path.display());
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Persist via write-replace so a crash mid-write never corrupts the
    /// existing file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn is_operator(&self, username: &Username) -> bool {
        self.operators_list.contains(username)
    }

    pub fn is_banned(&self, username: &Username) -> bool {
        self.banned_players.contains(username)
    }

    pub fn is_ip_banned(&self, ip: &str) -> bool {
        self.banned_ips.iter().any(|b| b == ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_roundtrip_through_json() {
        let config = ServerConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.port, 25565);
        assert_eq!(parsed.default_world_size.x, 64);
        assert_eq!(parsed.gzip_compression_level, 6);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: ServerConfig =
            serde_json::from_str(r#"{"port": 4000, "serverName": "Test"}"#).unwrap();
        assert_eq!(parsed.port, 4000);
        assert_eq!(parsed.server_name, "Test");
        assert_eq!(parsed.address, "0.0.0.0");
        assert_eq!(parsed.block_updates_before_reload, 2000);
    }

    #[test]
    fn test_save_is_write_replace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        let mut config = ServerConfig::default();
        config.save(&path).unwrap();
        config.port = 7777;
        config.save(&path).unwrap();
        let loaded = ServerConfig::load(&path).unwrap();
        assert_eq!(loaded.port, 7777);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_policy_lookups_are_normalized() {
        let mut config = ServerConfig::default();
        config.operators_list.push(Username::new("Admin").unwrap());
        config.banned_players.push(Username::new("Griefer").unwrap());
        assert!(config.is_operator(&Username::new("ADMIN").unwrap()));
        assert!(config.is_banned(&Username::new("griefer").unwrap()));
        assert!(!config.is_banned(&Username::new("alex").unwrap()));
    }
}
