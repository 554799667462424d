use std::collections::HashMap;
use std::sync::Arc;

use chisel_registry::{Registry, RegistryError};
use thiserror::Error;
use tracing::debug;

pub const AIR: u8 = 0;
pub const STONE: u8 = 1;
pub const BEDROCK: u8 = 7;

/// Last id of the base classic block set; everything above it needs the
/// CustomBlocks extension on the client.
pub const BASE_BLOCK_MAX: u8 = 49;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("unknown block id {0}")]
    UnknownId(u8),
    #[error("unknown block '{0}'")]
    UnknownName(String),
    #[error("block id {id} already registered as '{existing}'")]
    DuplicateId { id: u8, existing: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Per-block placement rule, evaluated by the placement pipeline after
/// the world-level checks pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacePolicy {
    #[default]
    Normal,
    /// Only operators may place or break this block.
    OpOnly,
}

/// One block kind. CPE-only blocks carry the fallback id shown to
/// clients that did not negotiate CustomBlocks.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: u8,
    pub name: &'static str,
    pub policy: PlacePolicy,
    pub fallback: Option<u8>,
}

impl Block {
    pub const fn new(id: u8, name: &'static str) -> Self {
        Self {
            id,
            name,
            policy: PlacePolicy::Normal,
            fallback: None,
        }
    }

    pub const fn op_only(mut self) -> Self {
        self.policy = PlacePolicy::OpOnly;
        self
    }

    pub const fn with_fallback(mut self, fallback: u8) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Liquids get special placement treatment (see the liquid-place
    /// module). Bedrock is handled by its own op-only policy instead.
    pub fn is_liquid_restricted(&self) -> bool {
        matches!(self.id, 8..=11)
    }
}

/// The id/name-unique block table. Lookups by name are case-insensitive.
pub struct BlockCatalog {
    registry: Registry<Arc<Block>>,
    by_id: HashMap<u8, Arc<Block>>,
}

impl BlockCatalog {
    pub fn new() -> Self {
        Self {
            registry: Registry::new("block"),
            by_id: HashMap::new(),
        }
    }

    pub fn register(&mut self, block: Block, overwrite: bool) -> Result<(), BlockError> {
        if let Some(existing) = self.by_id.get(&block.id) {
            if !overwrite {
                return Err(BlockError::DuplicateId {
                    id: block.id,
                    existing: existing.name.to_string(),
                });
            }
        }
        debug!(id = block.id, name = block.name, "registering block");
        let block = Arc::new(block);
        self.registry
            .register(block.name.to_ascii_lowercase(), block.clone(), overwrite)?;
        self.by_id.insert(block.id, block);
        Ok(())
    }

    pub fn get(&self, id: u8) -> Result<&Arc<Block>, BlockError> {
        self.by_id.get(&id).ok_or(BlockError::UnknownId(id))
    }

    pub fn get_by_name(&self, name: &str) -> Result<&Arc<Block>, BlockError> {
        self.registry
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| BlockError::UnknownName(name.to_string()))
    }

    pub fn has(&self, id: u8) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Block>> {
        self.registry.iter().map(|(_, block)| block)
    }

    /// Translate a block id for a client without CustomBlocks support.
    /// Base blocks pass through; CPE blocks degrade to their declared
    /// fallback (or stone if a registration forgot one).
    pub fn fallback_id(&self, id: u8) -> u8 {
        if id <= BASE_BLOCK_MAX {
            return id;
        }
        self.by_id
            .get(&id)
            .and_then(|b| b.fallback)
            .unwrap_or(STONE)
    }
}

impl Default for BlockCatalog {
    fn default() -> Self {
        let mut catalog = Self::new();
        register_core_blocks(&mut catalog).expect("core block set is internally consistent");
        catalog
    }
}

/// The classic base set, ids 0–49.
pub fn register_core_blocks(catalog: &mut BlockCatalog) -> Result<(), BlockError> {
    let blocks = [
        Block::new(0, "Air"),
        Block::new(1, "Stone"),
        Block::new(2, "Grass"),
        Block::new(3, "Dirt"),
        Block::new(4, "Cobblestone"),
        Block::new(5, "Planks"),
        Block::new(6, "Sapling"),
        Block::new(7, "Bedrock").op_only(),
        Block::new(8, "FlowingWater"),
        Block::new(9, "StationaryWater"),
        Block::new(10, "FlowingLava"),
        Block::new(11, "StationaryLava"),
        Block::new(12, "Sand"),
        Block::new(13, "Gravel"),
        Block::new(14, "GoldOre"),
        Block::new(15, "IronOre"),
        Block::new(16, "CoalOre"),
        Block::new(17, "Wood"),
        Block::new(18, "Leaves"),
        Block::new(19, "Sponge"),
        Block::new(20, "Glass"),
        Block::new(21, "RedCloth"),
        Block::new(22, "OrangeCloth"),
        Block::new(23, "YellowCloth"),
        Block::new(24, "ChartreuseCloth"),
        Block::new(25, "GreenCloth"),
        Block::new(26, "SpringGreenCloth"),
        Block::new(27, "CyanCloth"),
        Block::new(28, "CapriCloth"),
        Block::new(29, "UltramarineCloth"),
        Block::new(30, "VioletCloth"),
        Block::new(31, "PurpleCloth"),
        Block::new(32, "MagentaCloth"),
        Block::new(33, "RoseCloth"),
        Block::new(34, "DarkGrayCloth"),
        Block::new(35, "LightGrayCloth"),
        Block::new(36, "WhiteCloth"),
        Block::new(37, "Dandelion"),
        Block::new(38, "Rose"),
        Block::new(39, "BrownMushroom"),
        Block::new(40, "RedMushroom"),
        Block::new(41, "BlockGold"),
        Block::new(42, "BlockIron"),
        Block::new(43, "DoubleSlab"),
        Block::new(44, "Slab"),
        Block::new(45, "Bricks"),
        Block::new(46, "TNT"),
        Block::new(47, "Bookshelf"),
        Block::new(48, "MossyCobblestone"),
        Block::new(49, "Obsidian"),
    ];
    for block in blocks {
        catalog.register(block, false)?;
    }
    Ok(())
}

/// The CustomBlocks level-1 set, ids 50–65, each with its standard
/// fallback for non-supporting clients.
pub fn register_custom_blocks(catalog: &mut BlockCatalog) -> Result<(), BlockError> {
    let blocks = [
        Block::new(50, "CobblestoneSlab").with_fallback(44),
        Block::new(51, "Rope").with_fallback(39),
        Block::new(52, "Sandstone").with_fallback(12),
        Block::new(53, "Snow").with_fallback(0),
        Block::new(54, "Fire").with_fallback(10),
        Block::new(55, "LightPinkWool").with_fallback(33),
        Block::new(56, "ForestGreenWool").with_fallback(25),
        Block::new(57, "BrownWool").with_fallback(3),
        Block::new(58, "DeepBlue").with_fallback(29),
        Block::new(59, "Turquoise").with_fallback(28),
        Block::new(60, "Ice").with_fallback(20),
        Block::new(61, "CeramicTile").with_fallback(42),
        Block::new(62, "Magma").with_fallback(49),
        Block::new(63, "Pillar").with_fallback(36),
        Block::new(64, "Crate").with_fallback(5),
        Block::new(65, "StoneBrick").with_fallback(1),
    ];
    for block in blocks {
        catalog.register(block, false)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_set_is_complete() {
        let catalog = BlockCatalog::default();
        assert_eq!(catalog.len(), 50);
        for id in 0..=BASE_BLOCK_MAX {
            assert!(catalog.has(id), "missing base block {id}");
        }
    }

    #[test]
    fn test_name_lookup_is_case_insensitive() {
        let catalog = BlockCatalog::default();
        assert_eq!(catalog.get_by_name("stone").unwrap().id, 1);
        assert_eq!(catalog.get_by_name("STONE").unwrap().id, 1);
        assert!(catalog.get_by_name("adamantium").is_err());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut catalog = BlockCatalog::default();
        let err = catalog.register(Block::new(1, "FakeStone"), false).unwrap_err();
        assert!(matches!(err, BlockError::DuplicateId { id: 1, .. }));
    }

    #[test]
    fn test_bedrock_is_op_only() {
        let catalog = BlockCatalog::default();
        assert_eq!(catalog.get(BEDROCK).unwrap().policy, PlacePolicy::OpOnly);
    }

    #[test]
    fn test_custom_blocks_fall_back() {
        let mut catalog = BlockCatalog::default();
        register_custom_blocks(&mut catalog).unwrap();
        assert_eq!(catalog.fallback_id(50), 44);
        assert_eq!(catalog.fallback_id(65), 1);
        // Base blocks pass through untouched.
        assert_eq!(catalog.fallback_id(20), 20);
    }

    #[test]
    fn test_liquid_restriction_range() {
        let catalog = BlockCatalog::default();
        for id in 8..=11 {
            assert!(catalog.get(id).unwrap().is_liquid_restricted());
        }
        // Bedrock is op-gated, not liquid-gated.
        assert!(!catalog.get(BEDROCK).unwrap().is_liquid_restricted());
        assert!(!catalog.get(12).unwrap().is_liquid_restricted());
    }
}
