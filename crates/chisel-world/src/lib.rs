pub mod generator;
pub mod metadata;
pub mod world;

pub use generator::{EmptyGenerator, FlatGenerator, MapGenerator};
pub use metadata::MetadataBag;
pub use world::{gzip_level_stream, Actor, BulkChunk, World, WorldError, MAX_WORLD_VOLUME};
