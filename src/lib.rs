//! Terrastream - continuous level-of-detail and tile-paging terrain engine

pub mod core;
pub mod math;
pub mod heightfield;
pub mod terrain;
pub mod mesh;
pub mod clod;
pub mod streaming;

pub use crate::core::{CameraSnapshot, Error, Result};
pub use heightfield::{Extents, HeightFieldGrid, HeightQuery, LinearUnits};
pub use clod::{create_surface, DynamicTerrainSurface, SurfaceKind, SurfaceOptions};
pub use mesh::{TerrainMesh, Topology};
pub use streaming::{PagingConfig, TiledTerrain};
