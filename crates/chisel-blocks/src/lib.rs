pub mod catalog;

pub use catalog::{
    register_core_blocks, register_custom_blocks, Block, BlockCatalog, BlockError, PlacePolicy,
    AIR, BASE_BLOCK_MAX, BEDROCK, STONE,
};
