use std::io::{Read, Write};

use chisel_world::World;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::format::{FormatError, FormatRegistry, WorldFormat};

/// The simplest persistent form: a 6-byte big-endian dimension header
/// (`sizeX sizeY sizeZ` as i16) followed by the raw map array, the whole
/// file gzip-compressed. Carries no metadata.
pub struct RawGzipFormat;

impl WorldFormat for RawGzipFormat {
    fn name(&self) -> &'static str {
        "raw-gzip"
    }

    fn extensions(&self) -> &[&'static str] {
        &["gz"]
    }

    fn load(
        &self,
        data: &[u8],
        name: &str,
        _registry: &FormatRegistry,
    ) -> Result<World, FormatError> {
        let mut decoder = GzDecoder::new(data);
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw)?;

        if raw.len() < 6 {
            return Err(FormatError::BadHeader(format!(
                "file is {} bytes, need at least a 6-byte header",
                raw.len()
            )));
        }
        let size_x = i16::from_be_bytes([raw[0], raw[1]]);
        let size_y = i16::from_be_bytes([raw[2], raw[3]]);
        let size_z = i16::from_be_bytes([raw[4], raw[5]]);
        if size_x <= 0 || size_y <= 0 || size_z <= 0 {
            return Err(FormatError::BadHeader(format!(
                "non-positive dimensions {size_x}x{size_y}x{size_z}"
            )));
        }
        debug!(name, size_x, size_y, size_z, "loading raw-gzip world");

        let map = raw.split_off(6);
        let mut world = World::new(name, size_x as u16, size_y as u16, size_z as u16, map)?;
        world.format_name = Some(self.name().to_string());
        world.generate_spawn_coords(false);
        Ok(world)
    }

    fn save(&self, world: &World, _registry: &FormatRegistry) -> Result<Vec<u8>, FormatError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&(world.size_x as i16).to_be_bytes())?;
        encoder.write_all(&(world.size_y as i16).to_be_bytes())?;
        encoder.write_all(&(world.size_z as i16).to_be_bytes())?;
        encoder.write_all(world.map())?;
        Ok(encoder.finish()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chisel_world::{FlatGenerator, MapGenerator};

    #[test]
    fn test_save_load_roundtrip() {
        let registry = FormatRegistry::new();
        let world = FlatGenerator.generate_world("hills", 16, 8, 16, 7).unwrap();
        let saved = RawGzipFormat.save(&world, &registry).unwrap();
        let loaded = RawGzipFormat.load(&saved, "hills", &registry).unwrap();

        assert_eq!(loaded.size_x, 16);
        assert_eq!(loaded.size_y, 8);
        assert_eq!(loaded.size_z, 16);
        assert_eq!(loaded.map(), world.map());
        assert_eq!(loaded.format_name.as_deref(), Some("raw-gzip"));
        // Identical bytes after a load-save cycle.
        let resaved = RawGzipFormat.save(&loaded, &registry).unwrap();
        let reloaded = RawGzipFormat.load(&resaved, "hills", &registry).unwrap();
        assert_eq!(reloaded.map(), loaded.map());
    }

    #[test]
    fn test_truncated_file_rejected() {
        let registry = FormatRegistry::new();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[0, 16]).unwrap();
        let data = encoder.finish().unwrap();
        assert!(matches!(
            RawGzipFormat.load(&data, "broken", &registry),
            Err(FormatError::BadHeader(_))
        ));
    }

    #[test]
    fn test_header_map_size_must_agree() {
        let registry = FormatRegistry::new();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        // Claims 4x4x4 but carries a single block.
        encoder.write_all(&4i16.to_be_bytes()).unwrap();
        encoder.write_all(&4i16.to_be_bytes()).unwrap();
        encoder.write_all(&4i16.to_be_bytes()).unwrap();
        encoder.write_all(&[1]).unwrap();
        let data = encoder.finish().unwrap();
        assert!(RawGzipFormat.load(&data, "broken", &registry).is_err());
    }
}
