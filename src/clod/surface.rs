//! Strategy-independent CLOD surface state and the per-frame contract

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::camera::CameraSnapshot;
use crate::core::error::Error;
use crate::core::types::{Result, Vec2, Vec3};
use crate::heightfield::{HeightFieldGrid, HeightQuery, SurfacePoint};
use crate::math::{Aabb, Frustum};
use crate::mesh::TerrainMesh;
use super::options::{CullScheduler, SurfaceOptions};

/// Growth factor applied to the pixel error while over the polygon target
pub const BUDGET_GROWTH: f32 = 1.5;
/// Maximum number of pixel-error relaxations per cull
pub const BUDGET_STEPS: u32 = 16;

/// Lifecycle of a surface
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SurfaceState {
    #[default]
    Uninitialized,
    /// Grid attached, no cull yet
    Initialized,
    /// Has a visible set from at least one cull
    Active,
}

/// Counters updated by culling and rendering
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RenderStats {
    pub drawn_triangles: usize,
    /// Patches (or RTIN leaves) in the current visible set
    pub visible_patches: usize,
    /// Pixel error actually used after polygon-budget relaxation
    pub effective_pixel_error: f32,
    pub frames_rendered: u64,
    pub culls: u64,
}

/// Camera quantities needed to turn world-space errors into pixels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewMetrics {
    pub eye: Vec3,
    /// Pixels per world unit (at unit distance for perspective cameras)
    pub scale: f32,
    pub orthographic: bool,
    pub near: f32,
}

impl ViewMetrics {
    pub fn new(camera: &CameraSnapshot, screen_height: f32) -> Self {
        Self {
            eye: camera.position,
            scale: camera.projection_scale(screen_height),
            orthographic: camera.is_orthographic(),
            near: camera.near.max(1e-3),
        }
    }

    /// Screen size in pixels of a world-space length seen at `distance`
    #[inline]
    pub fn pixels(&self, world: f32, distance: f32) -> f32 {
        if self.orthographic {
            world * self.scale
        } else {
            world * self.scale / distance.max(self.near)
        }
    }

    /// Distance from the eye to the nearest point of a sphere, never below `near`
    #[inline]
    pub fn sphere_distance(&self, center: Vec3, radius: f32) -> f32 {
        (self.eye.distance(center) - radius).max(self.near)
    }
}

/// Relax `pixel_error` geometrically until `count` fits `target`.
///
/// Returns the pixel error used and the count it produced.
pub fn fit_polygon_budget(pixel_error: f32, target: usize, mut count: impl FnMut(f32) -> usize) -> (f32, usize) {
    let mut error = pixel_error.max(f32::EPSILON);
    let mut n = count(error);
    if target == 0 {
        return (error, n);
    }
    let mut steps = 0;
    while n > target && steps < BUDGET_STEPS {
        error *= BUDGET_GROWTH;
        n = count(error);
        steps += 1;
    }
    (error, n)
}

/// State shared by every strategy: lifecycle, grid, options, frustum, statistics.
pub struct SurfaceCore {
    state: SurfaceState,
    grid: Option<Arc<HeightFieldGrid>>,
    options: SurfaceOptions,
    scheduler: CullScheduler,
    frustum: Option<Frustum>,
    view: Option<ViewMetrics>,
    stats: RenderStats,
    external: Vec<Arc<dyn HeightQuery + Send + Sync>>,
}

impl SurfaceCore {
    pub fn new() -> Self {
        let options = SurfaceOptions::default();
        Self {
            state: SurfaceState::Uninitialized,
            grid: None,
            scheduler: CullScheduler::new(options.cull_policy),
            options,
            frustum: None,
            view: None,
            stats: RenderStats::default(),
            external: Vec::new(),
        }
    }

    /// Attach a grid and move to `Initialized`
    pub fn basic_init(&mut self, grid: Arc<HeightFieldGrid>) -> Result<()> {
        grid.extents().validate()?;
        if grid.cols() < 2 || grid.rows() < 2 {
            return Err(Error::InvalidGrid(format!("{}x{}", grid.cols(), grid.rows())));
        }
        self.grid = Some(grid);
        self.frustum = None;
        self.view = None;
        self.stats = RenderStats::default();
        self.state = SurfaceState::Initialized;
        Ok(())
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn grid(&self) -> Option<&Arc<HeightFieldGrid>> {
        self.grid.as_ref()
    }

    pub fn options(&self) -> &SurfaceOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: SurfaceOptions) {
        self.scheduler.set_policy(options.cull_policy);
        self.options = options;
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    /// Frustum of the last cull
    pub fn frustum(&self) -> Option<&Frustum> {
        self.frustum.as_ref()
    }

    pub fn view(&self) -> Option<&ViewMetrics> {
        self.view.as_ref()
    }

    pub fn request_cull(&mut self) {
        self.scheduler.request();
    }

    pub fn add_external_surface(&mut self, surface: Arc<dyn HeightQuery + Send + Sync>) {
        self.external.push(surface);
    }

    /// Whether the frame starting now must cull first
    pub(crate) fn cull_due(&mut self, dt: Duration) -> bool {
        let scheduled = self.scheduler.should_cull(dt);
        scheduled || self.state == SurfaceState::Initialized
    }

    /// Record a cull from `camera`; `None` before init
    pub(crate) fn begin_cull(&mut self, camera: &CameraSnapshot) -> Option<(Arc<HeightFieldGrid>, Frustum, ViewMetrics)> {
        let grid = self.grid.clone()?;
        let frustum = Frustum::from_camera(camera);
        let view = ViewMetrics::new(camera, self.options.screen_height);
        self.frustum = Some(frustum);
        self.view = Some(view);
        self.stats.culls += 1;
        self.state = SurfaceState::Active;
        Some((grid, frustum, view))
    }

    pub(crate) fn finish_cull(&mut self, visible: usize, effective_pixel_error: f32) {
        self.stats.visible_patches = visible;
        self.stats.effective_pixel_error = effective_pixel_error;
    }

    pub(crate) fn finish_render(&mut self, drawn_triangles: usize) {
        self.stats.drawn_triangles = drawn_triangles;
        self.stats.frames_rendered += 1;
    }

    /// Object-space bounds: x = col, y = height, z = row
    pub fn bound_box(&self) -> Option<Aabb> {
        let grid = self.grid.as_ref()?;
        let (min_h, max_h) = grid.height_range();
        Some(Aabb::new(
            Vec3::new(0.0, min_h, 0.0),
            Vec3::new((grid.cols() - 1) as f32, max_h, (grid.rows() - 1) as f32),
        ))
    }

    /// `bound_box` placed in world space by the grid's transform
    pub fn world_bound_box(&self) -> Option<Aabb> {
        let grid = self.grid.as_ref()?;
        Some(self.bound_box()?.transformed(&grid.transform().object_to_world()))
    }

    pub fn get_elevation(&self, col: usize, row: usize, true_elevation: bool) -> Option<f32> {
        self.grid.as_ref()?.get_elevation(col, row, true_elevation)
    }

    fn external_altitude(&self, point: Vec3) -> Option<f32> {
        self.external
            .iter()
            .filter_map(|s| s.find_altitude_at_point(point, false))
            .reduce(f32::max)
    }
}

impl Default for SurfaceCore {
    fn default() -> Self {
        Self::new()
    }
}

impl HeightQuery for SurfaceCore {
    fn find_altitude_at_point(&self, point: Vec3, include_external: bool) -> Option<f32> {
        let terrain = self.grid.as_ref()?.find_altitude_at_point(point, false)?;
        if include_external {
            if let Some(ext) = self.external_altitude(point) {
                return Some(terrain.max(ext));
            }
        }
        Some(terrain)
    }

    fn find_altitude_with_normal(&self, point: Vec3, include_external: bool) -> Option<SurfacePoint> {
        let terrain = self.grid.as_ref()?.find_altitude_with_normal(point, false)?;
        if include_external {
            let above = self
                .external
                .iter()
                .filter_map(|s| s.find_altitude_with_normal(point, false))
                .filter(|s| s.altitude > terrain.altitude)
                .max_by(|a, b| a.altitude.total_cmp(&b.altitude));
            if let Some(ext) = above {
                return Some(ext);
            }
        }
        Some(terrain)
    }

    fn world_bounds(&self) -> (Vec2, Vec2) {
        self.grid.as_ref().map_or((Vec2::ZERO, Vec2::ZERO), |g| g.world_bounds())
    }

    fn cell_size(&self) -> f32 {
        self.grid.as_ref().map_or(1.0, |g| g.cell_size())
    }
}

/// Pluggable continuous-level-of-detail triangulation.
///
/// Height queries come from the [`HeightQuery`] supertrait, so navigation
/// code does not care which strategy (or a static grid) sits underneath.
pub trait DynamicTerrainSurface: HeightQuery + Send {
    fn core(&self) -> &SurfaceCore;

    fn core_mut(&mut self) -> &mut SurfaceCore;

    fn name(&self) -> &'static str;

    /// Attach a grid and build the strategy's precomputed structures
    fn init(&mut self, grid: Arc<HeightFieldGrid>) -> Result<()>;

    /// Recompute the visible set and its levels of detail
    fn do_cull(&mut self, camera: &CameraSnapshot);

    /// Emit the culled set into `mesh`
    fn do_render(&mut self, mesh: &mut TerrainMesh);

    fn set_options(&mut self, options: SurfaceOptions) {
        self.core_mut().set_options(options);
    }

    fn options(&self) -> &SurfaceOptions {
        self.core().options()
    }

    fn state(&self) -> SurfaceState {
        self.core().state()
    }

    fn stats(&self) -> RenderStats {
        self.core().stats()
    }

    fn request_cull(&mut self) {
        self.core_mut().request_cull();
    }

    fn add_external_surface(&mut self, surface: Arc<dyn HeightQuery + Send + Sync>) {
        self.core_mut().add_external_surface(surface);
    }

    fn bound_box(&self) -> Option<Aabb> {
        self.core().bound_box()
    }

    fn world_bound_box(&self) -> Option<Aabb> {
        self.core().world_bound_box()
    }

    fn get_elevation(&self, col: usize, row: usize, true_elevation: bool) -> Option<f32> {
        self.core().get_elevation(col, row, true_elevation)
    }

    /// One frame: cull if the policy says so, then render
    fn frame(&mut self, camera: &CameraSnapshot, dt: Duration, mesh: &mut TerrainMesh) {
        if self.core().state() == SurfaceState::Uninitialized {
            mesh.clear(mesh.topology);
            return;
        }
        if self.core_mut().cull_due(dt) {
            self.do_cull(camera);
        }
        self.do_render(mesh);
    }
}

/// Available triangulation strategies
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    #[default]
    Patch,
    Rtin,
}

impl FromStr for SurfaceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "patch" => Ok(SurfaceKind::Patch),
            "rtin" => Ok(SurfaceKind::Rtin),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

/// Construct an uninitialised surface of the given kind
pub fn create_surface(kind: SurfaceKind) -> Box<dyn DynamicTerrainSurface> {
    match kind {
        SurfaceKind::Patch => Box::new(super::patch::PatchSurface::new()),
        SurfaceKind::Rtin => Box::new(super::rtin::RtinSurface::new()),
    }
}
