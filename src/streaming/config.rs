//! Paging tunables for the tiled terrain

use serde::{Deserialize, Serialize};

/// Tile paging configuration.
///
/// Every field may be changed between frames with
/// [`TiledTerrain::set_paging`](super::TiledTerrain::set_paging); the new
/// values apply from the next `render` call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    /// Preload distance as a multiple of the camera's far clip
    pub preload_radius: f32,
    /// Distance at which a tile's full-resolution texture swaps in; 0 disables the pyramid
    pub enabling_range: f32,
    /// Texel size treated as level 0
    pub base_texture_size: u32,
    /// Level difference before the resident level is swapped
    pub paging_aggressiveness: u32,
    /// Level difference before a finer level is actually loaded
    pub lazyness: u32,
    /// Frames over which every tile gets one load/LOD decision
    pub update_budget: u32,
    /// Frames a tile survives outside the preload radius; 0 disables eviction
    pub expiration: u32,
    /// Upper bound on tiles held by the cache
    pub cache_capacity: usize,
    /// Upper bound on outstanding loads
    pub max_in_flight: usize,
    /// Coarsest geometry stride exponent used for tile meshes
    pub max_geometry_level: u32,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            preload_radius: 1.25,
            enabling_range: 500.0,
            base_texture_size: 1024,
            paging_aggressiveness: 1,
            lazyness: 1,
            update_budget: 4,
            expiration: 120,
            cache_capacity: 256,
            max_in_flight: 4,
            max_geometry_level: 4,
        }
    }
}

impl PagingConfig {
    /// Tiles visited per frame for load/LOD decisions out of `tile_count`
    pub fn tiles_per_frame(&self, tile_count: usize) -> usize {
        tile_count.div_ceil(self.update_budget.max(1) as usize)
    }

    /// Preload distance for a camera with the given far clip
    pub fn preload_distance(&self, far: f32) -> f32 {
        self.preload_radius * far
    }
}
