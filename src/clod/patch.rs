//! Patch-based CLOD (geomipmapping)
//!
//! The grid is cut into square patches of [`PATCH_CELLS`] cells. Each patch
//! can be drawn at strides 1, 2, 4, 8 or 16; the largest vertical deviation
//! of every stride from the full-resolution surface is precomputed once.
//! Per frame a patch takes the coarsest stride whose projected deviation
//! stays under the pixel error. Skirts along patch borders hide the cracks
//! between neighbours at different strides.

use std::sync::Arc;

use rayon::prelude::*;

use crate::core::camera::CameraSnapshot;
use crate::core::types::{Result, Vec2, Vec3};
use crate::heightfield::grid::{interpolate_cell, is_odd_cell};
use crate::heightfield::{HeightFieldGrid, HeightQuery, SurfacePoint};
use crate::math::{Frustum, Visibility};
use crate::mesh::{quad_triangles, BatchMaterial, TerrainMesh, Topology};
use super::options::DetailTexture;
use super::surface::{fit_polygon_budget, DynamicTerrainSurface, SurfaceCore, ViewMetrics};

/// Cells along each side of a full patch
pub const PATCH_CELLS: usize = 16;
/// Strides 1 << 0 ..= 1 << 4
pub const PATCH_LEVELS: usize = 5;

/// Sample indices along one axis of a patch at `stride`, always including both ends
pub(crate) fn axis_samples(start: usize, cells: usize, stride: usize) -> Vec<usize> {
    let mut out: Vec<usize> = (0..cells).step_by(stride).map(|o| start + o).collect();
    out.push(start + cells);
    out
}

#[derive(Clone, Debug)]
struct Patch {
    col: usize,
    row: usize,
    cols: usize,
    rows: usize,
    /// Max vertical deviation per level; non-decreasing
    errors: [f32; PATCH_LEVELS],
    center: Vec3,
    radius: f32,
}

impl Patch {
    fn build(grid: &HeightFieldGrid, col: usize, row: usize) -> Self {
        let cols = PATCH_CELLS.min(grid.cols() - 1 - col);
        let rows = PATCH_CELLS.min(grid.rows() - 1 - row);

        let mut min_h = f32::INFINITY;
        let mut max_h = f32::NEG_INFINITY;
        for z in row..=row + rows {
            for x in col..=col + cols {
                let h = grid.sample_clamped(x, z);
                min_h = min_h.min(h);
                max_h = max_h.max(h);
            }
        }

        let mut errors = [0.0; PATCH_LEVELS];
        for level in 1..PATCH_LEVELS {
            let err = level_error(grid, col, row, cols, rows, 1 << level);
            errors[level] = err.max(errors[level - 1]);
        }

        let lo = grid.transform().grid_to_world(col as f32, row as f32, min_h);
        let hi = grid.transform().grid_to_world((col + cols) as f32, (row + rows) as f32, max_h);
        let center = (lo + hi) * 0.5;
        let radius = (hi - lo).length() * 0.5;

        Self { col, row, cols, rows, errors, center, radius }
    }

    /// Coarsest level whose projected error fits `pixel_error`
    fn select_level(&self, view: &ViewMetrics, distance: f32, pixel_error: f32) -> usize {
        (0..PATCH_LEVELS)
            .rev()
            .find(|&l| view.pixels(self.errors[l], distance) <= pixel_error)
            .unwrap_or(0)
    }

    fn triangle_count(&self, level: usize) -> usize {
        let stride = 1 << level;
        let nx = self.cols.div_ceil(stride);
        let nz = self.rows.div_ceil(stride);
        2 * nx * nz + 4 * (nx + nz)
    }
}

/// Largest deviation of the stride-`stride` surface from the samples it skips
fn level_error(grid: &HeightFieldGrid, col: usize, row: usize, cols: usize, rows: usize, stride: usize) -> f32 {
    let xs = axis_samples(col, cols, stride);
    let zs = axis_samples(row, rows, stride);
    let mut max_err = 0.0f32;
    for (m, zw) in zs.windows(2).enumerate() {
        for (k, xw) in xs.windows(2).enumerate() {
            let (x0, x1, z0, z1) = (xw[0], xw[1], zw[0], zw[1]);
            let h = [
                grid.sample_clamped(x0, z0),
                grid.sample_clamped(x1, z0),
                grid.sample_clamped(x1, z1),
                grid.sample_clamped(x0, z1),
            ];
            let odd = is_odd_cell(col / stride + k, row / stride + m);
            for z in z0..=z1 {
                let fz = (z - z0) as f32 / (z1 - z0) as f32;
                for x in x0..=x1 {
                    let fx = (x - x0) as f32 / (x1 - x0) as f32;
                    let err = (grid.sample_clamped(x, z) - interpolate_cell(h, fx, fz, odd)).abs();
                    max_err = max_err.max(err);
                }
            }
        }
    }
    max_err
}

#[derive(Clone, Copy, Debug)]
struct VisiblePatch {
    index: usize,
    level: usize,
    visibility: Visibility,
    distance: f32,
}

/// Geomipmapped terrain surface
pub struct PatchSurface {
    core: SurfaceCore,
    patches: Vec<Patch>,
    visible: Vec<VisiblePatch>,
}

impl PatchSurface {
    pub fn new() -> Self {
        Self { core: SurfaceCore::new(), patches: Vec::new(), visible: Vec::new() }
    }

    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }

    /// Level chosen for each visible patch by the last cull, keyed by first sample
    pub fn visible_levels(&self) -> Vec<((usize, usize), usize)> {
        self.visible
            .iter()
            .map(|v| {
                let p = &self.patches[v.index];
                ((p.col, p.row), v.level)
            })
            .collect()
    }

    fn emit_patch(
        mesh: &mut TerrainMesh,
        grid: &HeightFieldGrid,
        patch: &Patch,
        level: usize,
        clip: Option<&Frustum>,
        detail: Option<DetailTexture>,
    ) {
        let stride = 1 << level;
        let xs = axis_samples(patch.col, patch.cols, stride);
        let zs = axis_samples(patch.row, patch.rows, stride);
        let uv = |x: usize, z: usize| match detail {
            Some(d) => [x as f32 * d.tiling, z as f32 * d.tiling],
            None => [x as f32 / (grid.cols() - 1) as f32, z as f32 / (grid.rows() - 1) as f32],
        };

        let base = mesh.vertices.len() as u32;
        for &z in &zs {
            for &x in &xs {
                let p = grid.sample_position(x, z);
                mesh.push_vertex(p.to_array(), grid.sample_normal(x, z).to_array(), uv(x, z));
            }
        }
        let stride_x = xs.len() as u32;
        let idx = |k: usize, m: usize| base + m as u32 * stride_x + k as u32;
        let pos = |i: u32| Vec3::from(mesh.vertices[i as usize].position);

        let mut quads = Vec::with_capacity((xs.len() - 1) * (zs.len() - 1));
        for m in 0..zs.len() - 1 {
            for k in 0..xs.len() - 1 {
                let c = [idx(k, m), idx(k + 1, m), idx(k + 1, m + 1), idx(k, m + 1)];
                let odd = is_odd_cell(patch.col / stride + k, patch.row / stride + m);
                let keep = match clip {
                    None => [true, true],
                    Some(f) => quad_triangles(c, odd)
                        .map(|t| f.test_triangle(pos(t[0]), pos(t[1]), pos(t[2]), 0.0) != Visibility::Outside),
                };
                quads.push((c, odd, keep));
            }
        }
        for (c, odd, keep) in quads {
            match keep {
                [true, true] => mesh.push_quad(c, odd),
                [false, false] => {}
                _ => {
                    for (tri, visible) in quad_triangles(c, odd).into_iter().zip(keep) {
                        if visible {
                            mesh.push_triangle(tri[0], tri[1], tri[2]);
                        }
                    }
                }
            }
        }

        // Skirts, each border walked so its triangles face out of the patch
        let depth = patch.errors[PATCH_LEVELS - 1] + grid.cell_size();
        let (nx, nz) = (xs.len() - 1, zs.len() - 1);
        let south: Vec<u32> = (0..=nx).map(|k| idx(k, 0)).collect();
        let east: Vec<u32> = (0..=nz).map(|m| idx(nx, m)).collect();
        let north: Vec<u32> = (0..=nx).rev().map(|k| idx(k, nz)).collect();
        let west: Vec<u32> = (0..=nz).rev().map(|m| idx(0, m)).collect();
        for edge in [south, east, north, west] {
            mesh.push_skirt(&edge, depth);
        }
    }
}

impl Default for PatchSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl HeightQuery for PatchSurface {
    fn find_altitude_at_point(&self, point: Vec3, include_external: bool) -> Option<f32> {
        self.core.find_altitude_at_point(point, include_external)
    }

    fn find_altitude_with_normal(&self, point: Vec3, include_external: bool) -> Option<SurfacePoint> {
        self.core.find_altitude_with_normal(point, include_external)
    }

    fn world_bounds(&self) -> (Vec2, Vec2) {
        self.core.world_bounds()
    }

    fn cell_size(&self) -> f32 {
        self.core.cell_size()
    }
}

impl DynamicTerrainSurface for PatchSurface {
    fn core(&self) -> &SurfaceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SurfaceCore {
        &mut self.core
    }

    fn name(&self) -> &'static str {
        "patch"
    }

    fn init(&mut self, grid: Arc<HeightFieldGrid>) -> Result<()> {
        self.core.basic_init(grid.clone())?;

        let mut origins = Vec::new();
        for row in (0..grid.rows() - 1).step_by(PATCH_CELLS) {
            for col in (0..grid.cols() - 1).step_by(PATCH_CELLS) {
                origins.push((col, row));
            }
        }

        let start = std::time::Instant::now();
        self.patches = origins
            .par_iter()
            .map(|&(col, row)| Patch::build(&grid, col, row))
            .collect();
        self.visible.clear();

        log::info!(
            "Patch surface: {}x{} grid, {} patches, errors in {:.1}ms",
            grid.cols(),
            grid.rows(),
            self.patches.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }

    fn do_cull(&mut self, camera: &CameraSnapshot) {
        let Some((_, frustum, view)) = self.core.begin_cull(camera) else {
            return;
        };
        let pixel_error = self.core.options().pixel_error;
        let target = self.core.options().polygon_target;

        let candidates: Vec<VisiblePatch> = self
            .patches
            .iter()
            .enumerate()
            .filter_map(|(index, p)| {
                let visibility = frustum.test_sphere(p.center, p.radius);
                visibility.is_visible().then(|| VisiblePatch {
                    index,
                    level: 0,
                    visibility,
                    distance: view.sphere_distance(p.center, p.radius),
                })
            })
            .collect();

        let patches = &self.patches;
        let (effective, _) = fit_polygon_budget(pixel_error, target, |e| {
            candidates
                .iter()
                .map(|v| {
                    let p = &patches[v.index];
                    p.triangle_count(p.select_level(&view, v.distance, e))
                })
                .sum()
        });

        self.visible = candidates
            .into_iter()
            .map(|mut v| {
                v.level = patches[v.index].select_level(&view, v.distance, effective);
                v
            })
            .collect();
        self.core.finish_cull(self.visible.len(), effective);
        log::debug!("Patch cull: {} visible, pixel error {:.2}", self.visible.len(), effective);
    }

    fn do_render(&mut self, mesh: &mut TerrainMesh) {
        let options = self.core.options().clone();
        let topology = if options.prefer_strips { Topology::TriangleStrip } else { Topology::TriangleList };
        mesh.clear(topology);
        let Some(grid) = self.core.grid().cloned() else {
            self.core.finish_render(0);
            return;
        };
        let frustum = self.core.frustum().copied();

        let passes: Vec<(BatchMaterial, Option<DetailTexture>, f32, f32)> = match options.detail {
            Some(d) => vec![
                (BatchMaterial::Detail(d), Some(d), 0.0, d.fade_distance),
                (BatchMaterial::Untextured, None, d.fade_distance, f32::INFINITY),
            ],
            None => vec![(BatchMaterial::Untextured, None, 0.0, f32::INFINITY)],
        };
        for (material, detail, near, far) in passes {
            mesh.begin_batch(material);
            for v in self.visible.iter().filter(|v| v.distance >= near && v.distance < far) {
                let clip = match v.visibility {
                    Visibility::PartiallyVisible => frustum.as_ref(),
                    _ => None,
                };
                Self::emit_patch(mesh, &grid, &self.patches[v.index], v.level, clip, detail);
            }
        }
        mesh.drop_empty_batches();
        self.core.finish_render(mesh.triangle_count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::clod::SurfaceOptions;
    use crate::heightfield::{Extents, LinearUnits};
    use crate::terrain::{TerrainGenerator, TerrainParams};

    fn noise_grid(samples: usize) -> Arc<HeightFieldGrid> {
        let extent = (samples - 1) as f64 * 10.0;
        let source = TerrainGenerator::new(
            TerrainParams { seed: 4, ..Default::default() },
            Extents::new(0.0, extent, 0.0, extent),
            samples,
            samples,
        );
        Arc::new(HeightFieldGrid::from_source(&source).unwrap())
    }

    fn flat_grid(samples: usize) -> Arc<HeightFieldGrid> {
        let extent = (samples - 1) as f64;
        Arc::new(
            HeightFieldGrid::new(LinearUnits::Meters, Extents::new(0.0, extent, 0.0, extent), 2.0, 2.0, samples, samples)
                .unwrap(),
        )
    }

    fn overhead(center: f32, half_width: f32) -> CameraSnapshot {
        CameraSnapshot::orthographic(Vec3::new(center, 5000.0, center), -Vec3::Y, Vec3::Z, half_width, 1.0)
    }

    fn surface(grid: Arc<HeightFieldGrid>, options: SurfaceOptions) -> PatchSurface {
        let mut s = PatchSurface::new();
        s.init(grid).unwrap();
        s.set_options(options);
        s
    }

    #[test]
    fn test_axis_samples_cover_partial_patches() {
        assert_eq!(axis_samples(16, 16, 4), vec![16, 20, 24, 28, 32]);
        assert_eq!(axis_samples(32, 5, 4), vec![32, 36, 37]);
        assert_eq!(axis_samples(0, 16, 16), vec![0, 16]);
    }

    #[test]
    fn test_patch_layout_and_errors() {
        let s = surface(noise_grid(65), SurfaceOptions::default());
        assert_eq!(s.patch_count(), 16);
        for p in &s.patches {
            assert_eq!(p.errors[0], 0.0);
            assert!(p.errors.windows(2).all(|w| w[0] <= w[1]));
        }
        // 70 samples leave a 5-cell strip of partial patches
        let s = surface(noise_grid(70), SurfaceOptions::default());
        assert_eq!(s.patch_count(), 25);
    }

    #[test]
    fn test_flat_terrain_uses_coarsest_level() {
        let mut s = surface(flat_grid(65), SurfaceOptions::default());
        s.do_cull(&overhead(32.0, 100.0));
        let levels = s.visible_levels();
        assert_eq!(levels.len(), 16);
        assert!(levels.iter().all(|&(_, l)| l == PATCH_LEVELS - 1));
    }

    #[test]
    fn test_tiny_error_gives_full_resolution_matching_queries() {
        let grid = noise_grid(33);
        let options = SurfaceOptions { pixel_error: 0.0, polygon_target: 0, ..Default::default() };
        let mut s = surface(grid.clone(), options);
        let mut mesh = TerrainMesh::default();
        s.frame(&overhead(160.0, 1000.0), Duration::from_millis(16), &mut mesh);
        assert!(s.visible_levels().iter().all(|&(_, l)| l == 0));

        let mut surface_tris = 0;
        for t in mesh.all_triangles() {
            let p: Vec<Vec3> = t.iter().map(|&i| Vec3::from(mesh.vertices[i as usize].position)).collect();
            let n = (p[1] - p[0]).cross(p[2] - p[0]);
            assert!(n.y >= -1e-3, "triangle faces down");
            if n.y.abs() < 1e-3 {
                continue; // skirt
            }
            surface_tris += 1;
            let centroid = (p[0] + p[1] + p[2]) / 3.0;
            let alt = grid.find_altitude_at_point(centroid, false).unwrap();
            assert!((alt - centroid.y).abs() < 1e-2, "{} vs {}", alt, centroid.y);
        }
        assert_eq!(surface_tris, 32 * 32 * 2);
    }

    #[test]
    fn test_stats_follow_render() {
        let mut s = surface(noise_grid(65), SurfaceOptions::default());
        let mut mesh = TerrainMesh::default();
        s.frame(&overhead(320.0, 1000.0), Duration::from_millis(16), &mut mesh);
        let stats = s.stats();
        assert_eq!(stats.drawn_triangles, mesh.triangle_count());
        assert!(stats.drawn_triangles > 0);
        assert_eq!(stats.frames_rendered, 1);
        assert_eq!(stats.culls, 1);
        assert_eq!(stats.visible_patches, 16);
    }

    #[test]
    fn test_polygon_budget_raises_effective_error() {
        let options = SurfaceOptions { pixel_error: 0.01, polygon_target: 800, ..Default::default() };
        let mut s = surface(noise_grid(65), options);
        let mut mesh = TerrainMesh::default();
        // Wide view: at the final error every patch can drop to its coarsest level
        s.frame(&overhead(320.0, 10_000.0), Duration::from_millis(16), &mut mesh);
        let stats = s.stats();
        assert!(stats.effective_pixel_error > 0.01);
        assert!(stats.drawn_triangles <= 800);
    }

    #[test]
    fn test_camera_looking_away_draws_nothing() {
        let mut s = surface(noise_grid(65), SurfaceOptions::default());
        let cam = CameraSnapshot::look_at(Vec3::new(-1000.0, 50.0, -1000.0), Vec3::new(-1100.0, 50.0, -1100.0), Vec3::Y, 60.0, 1.5);
        let mut mesh = TerrainMesh::default();
        s.frame(&cam, Duration::from_millis(16), &mut mesh);
        assert_eq!(s.stats().visible_patches, 0);
        assert!(mesh.is_empty());
    }

    #[test]
    fn test_detail_batches_and_strips() {
        let detail = DetailTexture { material: 7, tiling: 0.5, fade_distance: f32::INFINITY };
        let options = SurfaceOptions { prefer_strips: true, detail: Some(detail), ..Default::default() };
        let mut s = surface(noise_grid(33), options);
        let mut mesh = TerrainMesh::default();
        s.frame(&overhead(160.0, 1000.0), Duration::from_millis(16), &mut mesh);
        assert_eq!(mesh.topology, Topology::TriangleStrip);
        assert_eq!(mesh.batches.len(), 1);
        assert_eq!(mesh.batches[0].material, BatchMaterial::Detail(detail));
        assert_eq!(mesh.all_triangles().len(), mesh.triangle_count());
    }

    #[test]
    fn test_on_demand_culling_keeps_visible_set() {
        let options = SurfaceOptions { cull_policy: crate::clod::CullPolicy::OnDemand, ..Default::default() };
        let mut s = surface(noise_grid(65), options);
        let mut mesh = TerrainMesh::default();
        s.frame(&overhead(320.0, 1000.0), Duration::from_millis(16), &mut mesh);
        let drawn = mesh.triangle_count();
        let away = CameraSnapshot::look_at(Vec3::new(-1000.0, 50.0, -1000.0), Vec3::new(-1100.0, 50.0, -1100.0), Vec3::Y, 60.0, 1.5);
        s.frame(&away, Duration::from_millis(16), &mut mesh);
        assert_eq!(mesh.triangle_count(), drawn);
        assert_eq!(s.stats().culls, 1);
        s.request_cull();
        s.frame(&away, Duration::from_millis(16), &mut mesh);
        assert!(mesh.is_empty());
        assert_eq!(s.stats().culls, 2);
    }
}
