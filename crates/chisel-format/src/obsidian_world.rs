use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chisel_types::FixedPos;
use chisel_world::World;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::format::{FormatError, FormatRegistry, WorldFormat};

const METADATA_MEMBER: &str = "metadata";
const MAP_MEMBER: &str = "map";
const EXT_METADATA_PREFIX: &str = "extmetadata/";
const FORMAT_VERSION: u64 = 1;

/// The native container: a ZIP archive with a JSON `metadata` member, a
/// gzipped `map` member, and one `extmetadata/<software>/<name>` JSON
/// member per metadata record. Members the server does not understand
/// are carried through a load-save cycle verbatim.
pub struct ObsidianWorldFormat;

impl WorldFormat for ObsidianWorldFormat {
    fn name(&self) -> &'static str {
        "obsidian-world"
    }

    fn extensions(&self) -> &[&'static str] {
        &["obw"]
    }

    fn supports_metadata(&self) -> bool {
        true
    }

    fn load(
        &self,
        data: &[u8],
        name: &str,
        registry: &FormatRegistry,
    ) -> Result<World, FormatError> {
        let mut archive = ZipArchive::new(Cursor::new(data))?;
        let mut members: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let mut buf = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buf)?;
            members.insert(file.name().to_string(), buf);
        }

        let meta_bytes = members
            .remove(METADATA_MEMBER)
            .ok_or(FormatError::MissingKey("metadata"))?;
        let meta: Value = serde_json::from_slice(&meta_bytes)?;

        // Critical keys; anything else is best-effort with defaults.
        require_key(&meta, "version")?;
        let world_name = require_key(&meta, "name")?
            .as_str()
            .ok_or(FormatError::MissingKey("name"))?
            .to_string();
        let size_x = require_u16(&meta, "X")?;
        let size_y = require_u16(&meta, "Y")?;
        let size_z = require_u16(&meta, "Z")?;
        debug!(name, world_name = %world_name, size_x, size_y, size_z, "loading obw world");

        let map_gz = members
            .remove(MAP_MEMBER)
            .ok_or(FormatError::MissingKey("map"))?;
        let mut decoder = GzDecoder::new(&map_gz[..]);
        let mut map = Vec::new();
        decoder.read_to_end(&mut map)?;

        let mut world = World::new(&world_name, size_x, size_y, size_z, map)?;
        world.format_name = Some(self.name().to_string());

        if let (Some(x), Some(y), Some(z)) = (
            get_i64(&meta, "spawnX"),
            get_i64(&meta, "spawnY"),
            get_i64(&meta, "spawnZ"),
        ) {
            world.spawn = Some(FixedPos::new(
                x as i16,
                y as i16,
                z as i16,
                get_i64(&meta, "spawnYaw").unwrap_or(0) as u8,
                get_i64(&meta, "spawnPitch").unwrap_or(0) as u8,
            ));
        }
        if let Some(seed) = get_i64(&meta, "seed") {
            world.seed = seed;
        }
        if let Some(can_edit) = meta.get("canEdit").and_then(Value::as_bool) {
            world.can_edit = can_edit;
        }
        if let Some(raw) = meta.get("worldUUID").and_then(Value::as_str) {
            world.uuid = Uuid::parse_str(raw)
                .map_err(|e| FormatError::BadHeader(format!("bad worldUUID: {e}")))?;
        }
        if let Some(secs) = meta.get("timeCreated").and_then(Value::as_u64) {
            world.created = UNIX_EPOCH + Duration::from_secs(secs);
        }
        if let Some(secs) = meta.get("lastModified").and_then(Value::as_u64) {
            world.last_modified = UNIX_EPOCH + Duration::from_secs(secs);
        }
        if let Some(generator) = meta.get("generator").and_then(Value::as_str) {
            world.generator_name = Some(generator.to_string());
        }
        world.generate_spawn_coords(false);

        for (member, bytes) in members {
            match parse_ext_member(&member) {
                Some((software, record)) => {
                    let value: Value = serde_json::from_slice(&bytes)?;
                    let value = registry.read_metadata(self.name(), &software, &record, value)?;
                    world.metadata.insert(software, record, value);
                }
                // Unknown members survive untouched for the next save.
                None => {
                    world.attachments.insert(member, bytes);
                }
            }
        }

        Ok(world)
    }

    fn save(&self, world: &World, registry: &FormatRegistry) -> Result<Vec<u8>, FormatError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();

        let mut meta = Map::new();
        meta.insert("version".into(), json!(FORMAT_VERSION));
        meta.insert("name".into(), json!(world.name));
        meta.insert("X".into(), json!(world.size_x));
        meta.insert("Y".into(), json!(world.size_y));
        meta.insert("Z".into(), json!(world.size_z));
        if let Some(spawn) = world.spawn {
            meta.insert("spawnX".into(), json!(spawn.x));
            meta.insert("spawnY".into(), json!(spawn.y));
            meta.insert("spawnZ".into(), json!(spawn.z));
            meta.insert("spawnYaw".into(), json!(spawn.yaw));
            meta.insert("spawnPitch".into(), json!(spawn.pitch));
        }
        meta.insert("seed".into(), json!(world.seed));
        meta.insert("canEdit".into(), json!(world.can_edit));
        meta.insert("worldUUID".into(), json!(world.uuid.to_string()));
        meta.insert("timeCreated".into(), json!(epoch_secs(world.created)));
        meta.insert("lastModified".into(), json!(epoch_secs(world.last_modified)));
        if let Some(generator) = &world.generator_name {
            meta.insert("generator".into(), json!(generator));
        }

        writer.start_file(METADATA_MEMBER, options)?;
        writer.write_all(&serde_json::to_vec_pretty(&Value::Object(meta))?)?;

        writer.start_file(MAP_MEMBER, options)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(world.map())?;
        writer.write_all(&encoder.finish()?)?;

        for (software, record, value) in world.metadata.iter() {
            let value = registry.write_metadata(self.name(), software, record, value.clone())?;
            writer.start_file(format!("{EXT_METADATA_PREFIX}{software}/{record}"), options)?;
            writer.write_all(&serde_json::to_vec_pretty(&value)?)?;
        }

        for (member, bytes) in &world.attachments {
            writer.start_file(member.as_str(), options)?;
            writer.write_all(bytes)?;
        }

        let cursor = writer.finish()?;
        Ok(cursor.into_inner())
    }
}

fn require_key<'a>(meta: &'a Value, key: &'static str) -> Result<&'a Value, FormatError> {
    meta.get(key).ok_or(FormatError::MissingKey(key))
}

fn require_u16(meta: &Value, key: &'static str) -> Result<u16, FormatError> {
    require_key(meta, key)?
        .as_u64()
        .and_then(|v| u16::try_from(v).ok())
        .ok_or(FormatError::MissingKey(key))
}

fn get_i64(meta: &Value, key: &str) -> Option<i64> {
    meta.get(key).and_then(Value::as_i64)
}

fn epoch_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// `extmetadata/<software>/<name>` → `(software, name)`.
fn parse_ext_member(member: &str) -> Option<(String, String)> {
    let rest = member.strip_prefix(EXT_METADATA_PREFIX)?;
    let (software, name) = rest.split_once('/')?;
    if software.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((software.to_string(), name.to_string()))
}
