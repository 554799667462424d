use chisel_blocks::AIR;
use tracing::debug;

use crate::world::{World, WorldError};

const DIRT: u8 = 3;
const GRASS: u8 = 2;

/// A map generator produces the raw map array for a fresh world. Output
/// length is validated against the requested dimensions.
pub trait MapGenerator: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str {
        ""
    }
    fn generate(&self, size_x: u16, size_y: u16, size_z: u16, seed: i64) -> Vec<u8>;

    /// Generate and wrap into a [`World`], enforcing the size contract.
    fn generate_world(
        &self,
        name: &str,
        size_x: u16,
        size_y: u16,
        size_z: u16,
        seed: i64,
    ) -> Result<World, WorldError> {
        debug!(
            generator = self.name(),
            name, size_x, size_y, size_z, "generating world"
        );
        let map = self.generate(size_x, size_y, size_z, seed);
        let mut world = World::new(name, size_x, size_y, size_z, map)?;
        world.seed = seed;
        world.generator_name = Some(self.name().to_string());
        world.generate_spawn_coords(true);
        Ok(world)
    }
}

/// Dirt up to the midpoint with a grass cap, air above.
pub struct FlatGenerator;

impl MapGenerator for FlatGenerator {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn description(&self) -> &'static str {
        "A flat grass world"
    }

    fn generate(&self, size_x: u16, size_y: u16, size_z: u16, _seed: i64) -> Vec<u8> {
        let (sx, sy, sz) = (size_x as usize, size_y as usize, size_z as usize);
        let grass_height = sy / 2;
        let mut map = vec![AIR; sx * sy * sz];
        let layer = sx * sz;
        for y in 0..grass_height {
            let block = if y + 1 == grass_height { GRASS } else { DIRT };
            map[y * layer..(y + 1) * layer].fill(block);
        }
        map
    }
}

/// Nothing but air.
pub struct EmptyGenerator;

impl MapGenerator for EmptyGenerator {
    fn name(&self) -> &'static str {
        "empty"
    }

    fn description(&self) -> &'static str {
        "An empty void"
    }

    fn generate(&self, size_x: u16, size_y: u16, size_z: u16, _seed: i64) -> Vec<u8> {
        vec![AIR; size_x as usize * size_y as usize * size_z as usize]
    }
}
