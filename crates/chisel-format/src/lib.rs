pub mod format;
pub mod obsidian_world;
pub mod raw_gzip;

pub use format::{FormatError, FormatRegistry, MetadataCodec, WorldFormat};
pub use obsidian_world::ObsidianWorldFormat;
pub use raw_gzip::RawGzipFormat;
