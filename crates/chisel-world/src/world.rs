use std::io::Write;
use std::time::SystemTime;

use chisel_blocks::AIR;
use chisel_types::{BlockPos, FixedPos};
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::metadata::MetadataBag;

/// Default upper bound on sizeX * sizeY * sizeZ.
pub const MAX_WORLD_VOLUME: usize = 16_777_216;

/// Chunk size for the BulkBlockUpdate (0x26) packet.
const BULK_CHUNK: usize = 256;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("Block Placement Is Out Of Range {0}")]
    BlockOutOfRange(BlockPos),
    #[error("world volume {0} exceeds the {MAX_WORLD_VOLUME} limit")]
    VolumeTooLarge(usize),
    #[error("expected {expected} bytes of map data, got {got}")]
    MapSizeMismatch { expected: usize, got: usize },
    #[error("You Do Not Have Permission To Edit This World")]
    ReadOnly,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whoever is driving a block write. `None` actors (generators, admin
/// scripts) bypass the read-only check; that back door is intentional.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub is_op: bool,
}

/// Up to 256 block changes addressed by linear map index, ready to be
/// packed into one 0x26 packet.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkChunk {
    pub indices: Vec<i32>,
    pub block_ids: Vec<u8>,
}

/// One voxel world: the authoritative map array plus its identity and
/// bookkeeping. All mutation goes through the block-write API so the
/// modified stamp and range checks hold.
pub struct World {
    pub name: String,
    pub size_x: u16,
    pub size_y: u16,
    pub size_z: u16,
    map: Vec<u8>,
    pub spawn: Option<FixedPos>,
    pub seed: i64,
    pub can_edit: bool,
    pub uuid: Uuid,
    pub created: SystemTime,
    pub last_modified: SystemTime,
    /// Non-persistent worlds skip every save.
    pub persistent: bool,
    pub metadata: MetadataBag,
    /// Opaque container members carried from load to save so a format
    /// upgrade elsewhere never loses data (e.g. unknown `.obw` entries).
    pub attachments: std::collections::BTreeMap<String, Vec<u8>>,
    pub generator_name: Option<String>,
    pub format_name: Option<String>,
}

impl World {
    pub fn new(
        name: impl Into<String>,
        size_x: u16,
        size_y: u16,
        size_z: u16,
        map: Vec<u8>,
    ) -> Result<Self, WorldError> {
        let volume = size_x as usize * size_y as usize * size_z as usize;
        if volume > MAX_WORLD_VOLUME {
            return Err(WorldError::VolumeTooLarge(volume));
        }
        if map.len() != volume {
            return Err(WorldError::MapSizeMismatch {
                expected: volume,
                got: map.len(),
            });
        }
        let now = SystemTime::now();
        Ok(Self {
            name: name.into(),
            size_x,
            size_y,
            size_z,
            map,
            spawn: None,
            seed: 0,
            can_edit: true,
            uuid: Uuid::new_v4(),
            created: now,
            last_modified: now,
            persistent: true,
            metadata: MetadataBag::new(),
            attachments: std::collections::BTreeMap::new(),
            generator_name: None,
            format_name: None,
        })
    }

    pub fn volume(&self) -> usize {
        self.map.len()
    }

    pub fn map(&self) -> &[u8] {
        &self.map
    }

    /// The observable map order: x varies fastest, then z, then y.
    /// Clients receive the level stream in exactly this order.
    pub fn linear_index(&self, x: i16, y: i16, z: i16) -> Result<usize, WorldError> {
        if x < 0
            || y < 0
            || z < 0
            || x as u16 >= self.size_x
            || y as u16 >= self.size_y
            || z as u16 >= self.size_z
        {
            return Err(WorldError::BlockOutOfRange(BlockPos::new(x, y, z)));
        }
        let (x, y, z) = (x as usize, y as usize, z as usize);
        Ok(x + self.size_x as usize * (z + self.size_z as usize * y))
    }

    pub fn get_block(&self, x: i16, y: i16, z: i16) -> Result<u8, WorldError> {
        Ok(self.map[self.linear_index(x, y, z)?])
    }

    /// Write one block. An op actor (or no actor at all) may write to a
    /// read-only world; everyone else gets `WorldError::ReadOnly`.
    pub fn set_block(
        &mut self,
        x: i16,
        y: i16,
        z: i16,
        block_id: u8,
        actor: Option<Actor>,
    ) -> Result<(), WorldError> {
        if let Some(actor) = actor {
            if !self.can_edit && !actor.is_op {
                return Err(WorldError::ReadOnly);
            }
        }
        let index = self.linear_index(x, y, z)?;
        self.map[index] = block_id;
        self.last_modified = SystemTime::now();
        Ok(())
    }

    /// Apply a batch of writes. Every coordinate is validated before the
    /// first write lands, so a bad batch leaves the map untouched.
    pub fn apply_bulk(&mut self, updates: &[(BlockPos, u8)]) -> Result<(), WorldError> {
        let mut indices = Vec::with_capacity(updates.len());
        for (pos, _) in updates {
            indices.push(self.linear_index(pos.x, pos.y, pos.z)?);
        }
        for (index, (_, block_id)) in indices.into_iter().zip(updates) {
            self.map[index] = *block_id;
        }
        self.last_modified = SystemTime::now();
        debug!(world = %self.name, count = updates.len(), "bulk update applied");
        Ok(())
    }

    /// Split a validated batch into 0x26-sized chunks of linear indices.
    pub fn bulk_chunks(&self, updates: &[(BlockPos, u8)]) -> Result<Vec<BulkChunk>, WorldError> {
        let mut chunks = Vec::with_capacity(updates.len().div_ceil(BULK_CHUNK));
        for window in updates.chunks(BULK_CHUNK) {
            let mut indices = Vec::with_capacity(window.len());
            let mut block_ids = Vec::with_capacity(window.len());
            for (pos, block_id) in window {
                indices.push(self.linear_index(pos.x, pos.y, pos.z)? as i32);
                block_ids.push(*block_id);
            }
            chunks.push(BulkChunk { indices, block_ids });
        }
        Ok(chunks)
    }

    /// Gzip the map for a level transfer (or RawGzip persistence). The
    /// level transfer variant prefixes the big-endian map length.
    pub fn gzip_map(&self, level: u32, include_size_header: bool) -> Result<Vec<u8>, WorldError> {
        gzip_level_stream(&self.map, level, include_size_header).map_err(WorldError::Io)
    }

    /// Pick a spawn if none is stored (or a reset is forced): scan the
    /// center column top-down for the first non-air block and stand two
    /// blocks above it.
    pub fn generate_spawn_coords(&mut self, reset: bool) -> FixedPos {
        if let (Some(spawn), false) = (self.spawn, reset) {
            return spawn;
        }
        let center_x = (self.size_x / 2) as i16;
        let center_z = (self.size_z / 2) as i16;
        let mut surface_y = 0i16;
        for y in (0..self.size_y as i16).rev() {
            if self.get_block(center_x, y, center_z).unwrap_or(AIR) != AIR {
                surface_y = y;
                break;
            }
        }
        let spawn = FixedPos::from_block(center_x, surface_y + 2, center_z);
        debug!(world = %self.name, ?spawn, "spawn coordinates generated");
        self.spawn = Some(spawn);
        spawn
    }
}

/// Gzip a raw map array, optionally prefixed by its `u32` length as the
/// level-transfer stream requires.
pub fn gzip_level_stream(
    map: &[u8],
    level: u32,
    include_size_header: bool,
) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.min(9)));
    if include_size_header {
        encoder.write_all(&(map.len() as u32).to_be_bytes())?;
    }
    encoder.write_all(map)?;
    encoder.finish()
}
