//! Out-of-core tiled terrain: tile sets on disk, background loading and
//! distance-driven paging

pub mod config;
pub mod lod;
pub mod manifest;
pub mod tile;
pub mod cache;
pub mod loader;
pub mod writer;
pub mod terrain;

pub use config::PagingConfig;
pub use lod::{
    decide_level, desired_level, geometry_stride, level_size, max_texture_level, source_level,
    LevelChange,
};
pub use manifest::{TileManifest, MANIFEST_FILE};
pub use tile::{Tile, TileData, TileId, TileLayout, TileState, TileStore};
pub use cache::{PendingLoad, TileCache};
pub use loader::{InlineTileLoader, LoadRequest, LoadResult, ThreadedTileLoader, TileLoader};
pub use writer::write_tileset;
pub use terrain::{PagingStats, TiledTerrain};
