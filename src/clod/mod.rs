//! Continuous level-of-detail terrain surfaces
//!
//! [`DynamicTerrainSurface`] is the per-frame contract (cull, then render);
//! [`PatchSurface`] and [`RtinSurface`] are the two triangulation strategies.

pub mod options;
pub mod surface;
pub mod patch;
pub mod rtin;

pub use options::{CullPolicy, CullScheduler, DetailTexture, SurfaceOptions};
pub use surface::{
    create_surface, fit_polygon_budget, DynamicTerrainSurface, RenderStats, SurfaceCore, SurfaceKind,
    SurfaceState, ViewMetrics,
};
pub use patch::PatchSurface;
pub use rtin::RtinSurface;
