//! Elevation grids and the queries navigation code runs against them

pub mod extents;
pub mod grid;
pub mod source;
pub mod raycast;

pub use extents::{Extents, GridTransform, LinearUnits};
pub use grid::{HeightFieldGrid, HeightQuery, SurfacePoint};
pub use source::{ElevationSource, GridSource};
pub use raycast::cast_ray_to_surface;
