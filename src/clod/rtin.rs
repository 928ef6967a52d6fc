//! Right-triangulated irregular network (RTIN) CLOD
//!
//! The grid is embedded in the smallest power-of-two square that holds it and
//! covered by a binary tree of right triangles whose root diagonal runs from
//! (0, 0) to (size, size). Every hypotenuse midpoint stores the largest
//! vertical error of any triangle split at that point, so a triangle splits
//! exactly when the projected error at its midpoint exceeds the tolerance.
//! Two triangles sharing a hypotenuse share the midpoint and therefore the
//! decision, which keeps the mesh crack-free.

use std::sync::Arc;

use crate::core::camera::CameraSnapshot;
use crate::core::types::{Result, UVec2, Vec2, Vec3};
use crate::heightfield::{HeightFieldGrid, HeightQuery, SurfacePoint};
use crate::math::{Frustum, Visibility};
use crate::mesh::{BatchMaterial, TerrainMesh, Topology};
use super::surface::{fit_polygon_budget, DynamicTerrainSurface, SurfaceCore, ViewMetrics};

/// Bounding-sphere radius per unit of hypotenuse length.
///
/// Must be at least 1 / (2 - sqrt 2) ~ 1.207 so child spheres nest in parents.
pub const SPHERE_NESTING: f32 = 1.25;

const UNUSED: u32 = u32::MAX;

#[derive(Clone, Copy, Debug)]
struct Leaf {
    corners: [UVec2; 3],
    /// Parent sphere was only partially visible
    clip: bool,
}

/// Error map for a grid: `size` is the power-of-two side, errors are `(size+1)^2`
fn build_error_map(grid: &HeightFieldGrid) -> (u32, Vec<f32>) {
    let lim_x = (grid.cols() - 1) as u32;
    let lim_z = (grid.rows() - 1) as u32;
    let size = lim_x.max(lim_z).next_power_of_two();
    let n = size + 1;
    let mut errors = vec![0.0f32; (n * n) as usize];
    let h = |x: u32, z: u32| grid.sample_clamped(x as usize, z as usize);

    let num_triangles = size * size * 2 - 2;
    let num_parents = num_triangles.saturating_sub(size * size);

    for i in (0..num_triangles).rev() {
        let mut id = i + 2;
        let (mut ax, mut ay, mut bx, mut by, mut cx, mut cy) = (0u32, 0u32, 0u32, 0u32, 0u32, 0u32);
        if id & 1 == 1 {
            bx = size;
            by = size;
            cx = size;
        } else {
            ax = size;
            ay = size;
            cy = size;
        }
        loop {
            id >>= 1;
            if id <= 1 {
                break;
            }
            let mx = (ax + bx) >> 1;
            let my = (ay + by) >> 1;
            if id & 1 == 1 {
                bx = ax;
                by = ay;
                ax = cx;
                ay = cy;
            } else {
                ax = bx;
                ay = by;
                bx = cx;
                by = cy;
            }
            cx = mx;
            cy = my;
        }

        let mx = (ax + bx) >> 1;
        let my = (ay + by) >> 1;
        let mid = (my * n + mx) as usize;

        // Triangles crossing the grid's far edges always split down to cells
        let (min_x, max_x) = (ax.min(bx).min(cx), ax.max(bx).max(cx));
        let (min_z, max_z) = (ay.min(by).min(cy), ay.max(by).max(cy));
        let straddles = (min_x < lim_x && max_x > lim_x) || (min_z < lim_z && max_z > lim_z);
        let err = if straddles {
            f32::MAX
        } else {
            ((h(ax, ay) + h(bx, by)) * 0.5 - h(mx, my)).abs()
        };
        errors[mid] = errors[mid].max(err);

        if i < num_parents {
            let left = (((ay + cy) >> 1) * n + ((ax + cx) >> 1)) as usize;
            let right = (((by + cy) >> 1) * n + ((bx + cx) >> 1)) as usize;
            errors[mid] = errors[mid].max(errors[left]).max(errors[right]);
        }
    }
    (size, errors)
}

/// Per-cull traversal state
struct Traversal<'a> {
    errors: &'a [f32],
    n: u32,
    lim: UVec2,
    frustum: &'a Frustum,
    view: &'a ViewMetrics,
    pixel_error: f32,
    spacing: Vec2,
    cell: f32,
    mid_y: f32,
    half_range: f32,
}

impl Traversal<'_> {
    fn visit(&self, a: UVec2, b: UVec2, c: UVec2, vis: Visibility, out: &mut Vec<Leaf>) {
        let splittable = a.x.abs_diff(c.x) + a.y.abs_diff(c.y) > 1;
        if !splittable {
            self.emit(a, b, c, vis, out);
            return;
        }

        let m = (a + b) / 2;
        let hyp = a.as_vec2().distance(b.as_vec2()) * self.cell;
        let center = Vec3::new(m.x as f32 * self.spacing.x, self.mid_y, m.y as f32 * self.spacing.y);
        let radius = SPHERE_NESTING * hyp + self.half_range;
        let vis = match vis {
            Visibility::FullyVisible => vis,
            _ => self.frustum.test_sphere(center, radius),
        };
        if vis == Visibility::Outside {
            return;
        }

        let err = self.errors[(m.y * self.n + m.x) as usize];
        if self.view.pixels(err, self.view.sphere_distance(center, radius)) > self.pixel_error {
            self.visit(c, a, m, vis, out);
            self.visit(b, c, m, vis, out);
        } else {
            self.emit(a, b, c, vis, out);
        }
    }

    fn emit(&self, a: UVec2, b: UVec2, c: UVec2, vis: Visibility, out: &mut Vec<Leaf>) {
        let [a, b, c] = [a, b, c].map(|p| p.min(self.lim));
        let (ab, ac) = (b.as_ivec2() - a.as_ivec2(), c.as_ivec2() - a.as_ivec2());
        if ab.perp_dot(ac) == 0 {
            return;
        }
        out.push(Leaf { corners: [a, b, c], clip: vis != Visibility::FullyVisible });
    }
}

/// RTIN terrain surface
pub struct RtinSurface {
    core: SurfaceCore,
    size: u32,
    errors: Vec<f32>,
    leaves: Vec<Leaf>,
    vertex_map: Vec<u32>,
    touched: Vec<usize>,
}

impl RtinSurface {
    pub fn new() -> Self {
        Self {
            core: SurfaceCore::new(),
            size: 0,
            errors: Vec::new(),
            leaves: Vec::new(),
            vertex_map: Vec::new(),
            touched: Vec::new(),
        }
    }

    /// Side of the power-of-two square the error map covers, in cells
    pub fn map_size(&self) -> u32 {
        self.size
    }

    /// Triangles selected by the last cull
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    fn vertex(&mut self, mesh: &mut TerrainMesh, grid: &HeightFieldGrid, p: UVec2, uv_scale: Option<f32>) -> u32 {
        let (x, z) = (p.x as usize, p.y as usize);
        let slot = z * grid.cols() + x;
        if self.vertex_map[slot] == UNUSED {
            let uv = match uv_scale {
                Some(t) => [x as f32 * t, z as f32 * t],
                None => [x as f32 / (grid.cols() - 1) as f32, z as f32 / (grid.rows() - 1) as f32],
            };
            let pos = grid.sample_position(x, z).to_array();
            self.vertex_map[slot] = mesh.push_vertex(pos, grid.sample_normal(x, z).to_array(), uv);
            self.touched.push(slot);
        }
        self.vertex_map[slot]
    }

    fn reset_vertex_map(&mut self) {
        for slot in self.touched.drain(..) {
            self.vertex_map[slot] = UNUSED;
        }
    }
}

impl Default for RtinSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl HeightQuery for RtinSurface {
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

impl DynamicTerrainSurface for RtinSurface {
    fn core(&self) -> &SurfaceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SurfaceCore {
        &mut self.core
    }

    fn name(&self) -> &'static str {
        "rtin"
    }

    fn init(&mut self, grid: Arc<HeightFieldGrid>) -> Result<()> {
        self.core.basic_init(grid.clone())?;
        let start = std::time::Instant::now();
        let (size, errors) = build_error_map(&grid);
        self.size = size;
        self.errors = errors;
        self.leaves.clear();
        self.vertex_map = vec![UNUSED; grid.cols() * grid.rows()];
        self.touched.clear();
        log::info!(
            "RTIN surface: {}x{} grid, {}^2 error map in {:.1}ms",
            grid.cols(),
            grid.rows(),
            size + 1,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }

    fn do_cull(&mut self, camera: &CameraSnapshot) {
        let Some((grid, frustum, view)) = self.core.begin_cull(camera) else {
            return;
        };
        let pixel_error = self.core.options().pixel_error;
        let target = self.core.options().polygon_target;
        let (min_h, max_h) = grid.height_range();
        let spacing = grid.spacing();

        let mut traversal = Traversal {
            errors: &self.errors,
            n: self.size + 1,
            lim: UVec2::new((grid.cols() - 1) as u32, (grid.rows() - 1) as u32),
            frustum: &frustum,
            view: &view,
            pixel_error,
            spacing,
            cell: spacing.max_element(),
            mid_y: (min_h + max_h) * 0.5,
            half_range: (max_h - min_h) * 0.5,
        };
        let size = self.size;
        let mut leaves = std::mem::take(&mut self.leaves);
        let (effective, _) = fit_polygon_budget(pixel_error, target, |e| {
            traversal.pixel_error = e;
            leaves.clear();
            let (origin, far) = (UVec2::ZERO, UVec2::splat(size));
            traversal.visit(origin, far, UVec2::new(size, 0), Visibility::PartiallyVisible, &mut leaves);
            traversal.visit(far, origin, UVec2::new(0, size), Visibility::PartiallyVisible, &mut leaves);
            leaves.len()
        });
        self.leaves = leaves;
        self.core.finish_cull(self.leaves.len(), effective);
        log::debug!("RTIN cull: {} triangles, pixel error {:.2}", self.leaves.len(), effective);
    }

    fn do_render(&mut self, mesh: &mut TerrainMesh) {
        let options = self.core.options().clone();
        let topology = if options.prefer_strips { Topology::TriangleStrip } else { Topology::TriangleList };
        mesh.clear(topology);
        let (Some(grid), Some(view)) = (self.core.grid().cloned(), self.core.view().copied()) else {
            self.core.finish_render(0);
            return;
        };
        let frustum = self.core.frustum().copied();
        let spacing = grid.spacing();
        let centroid_distance = |leaf: &Leaf| {
            let sum = leaf.corners.iter().fold(Vec2::ZERO, |acc, p| acc + p.as_vec2()) / 3.0;
            let p = Vec3::new(sum.x * spacing.x, view.eye.y, sum.y * spacing.y);
            p.distance(view.eye)
        };

        let passes = match options.detail {
            Some(d) => vec![
                (BatchMaterial::Detail(d), Some(d.tiling), 0.0, d.fade_distance),
                (BatchMaterial::Untextured, None, d.fade_distance, f32::INFINITY),
            ],
            None => vec![(BatchMaterial::Untextured, None, 0.0, f32::INFINITY)],
        };

        let leaves = std::mem::take(&mut self.leaves);
        for (material, uv_scale, near, far) in passes {
            mesh.begin_batch(material);
            for leaf in &leaves {
                let d = centroid_distance(leaf);
                if d < near || d >= far {
                    continue;
                }
                let idx = leaf.corners.map(|p| self.vertex(mesh, &grid, p, uv_scale));
                if let (true, Some(f)) = (leaf.clip, frustum.as_ref()) {
                    let p = idx.map(|i| Vec3::from(mesh.vertices[i as usize].position));
                    if f.test_triangle(p[0], p[1], p[2], 0.0) == Visibility::Outside {
                        continue;
                    }
                }
                mesh.push_triangle(idx[0], idx[1], idx[2]);
            }
            // Vertices are not shared across batches
            self.reset_vertex_map();
        }
        self.leaves = leaves;
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
            TerrainParams { seed: 11, ..Default::default() },
            Extents::new(0.0, extent, 0.0, extent),
            samples,
            samples,
        );
        Arc::new(HeightFieldGrid::from_source(&source).unwrap())
    }

    fn flat_grid(cols: usize, rows: usize) -> Arc<HeightFieldGrid> {
        let extents = Extents::new(0.0, (cols - 1) as f64, 0.0, (rows - 1) as f64);
        Arc::new(HeightFieldGrid::new(LinearUnits::Meters, extents, 1.0, 1.0, cols, rows).unwrap())
    }

    fn overhead(center: Vec2, half_width: f32) -> CameraSnapshot {
        CameraSnapshot::orthographic(Vec3::new(center.x, 5000.0, center.y), -Vec3::Y, Vec3::Z, half_width, 1.0)
    }

    fn render(grid: Arc<HeightFieldGrid>, options: SurfaceOptions, camera: &CameraSnapshot) -> (RtinSurface, TerrainMesh) {
        let mut s = RtinSurface::new();
        s.init(grid).unwrap();
        s.set_options(options);
        let mut mesh = TerrainMesh::default();
        s.frame(camera, Duration::from_millis(16), &mut mesh);
        (s, mesh)
    }

    /// Sum of the triangles' areas projected onto the XZ plane
    fn covered_area(mesh: &TerrainMesh) -> f32 {
        mesh.all_triangles()
            .iter()
            .map(|t| {
                let p: Vec<Vec3> = t.iter().map(|&i| Vec3::from(mesh.vertices[i as usize].position)).collect();
                let n = (p[1] - p[0]).cross(p[2] - p[0]);
                assert!(n.y > 0.0, "triangle is not counter-clockwise from above");
                n.y * 0.5
            })
            .sum()
    }

    #[test]
    fn test_error_map_size() {
        let (size, errors) = build_error_map(&noise_grid(33));
        assert_eq!(size, 32);
        assert_eq!(errors.len(), 33 * 33);
        let (size, _) = build_error_map(&flat_grid(20, 7));
        assert_eq!(size, 32);
        let (size, errors) = build_error_map(&flat_grid(2, 2));
        assert_eq!(size, 1);
        assert!(errors.iter().all(|&e| e == 0.0));
    }

    #[test]
    fn test_parent_errors_bound_children() {
        let (size, errors) = build_error_map(&noise_grid(17));
        let n = size + 1;
        // Root midpoint carries the largest error of the whole map
        let root = errors[(8 * n + 8) as usize];
        assert!(errors.iter().all(|&e| e <= root));
    }

    #[test]
    fn test_flat_power_of_two_is_two_triangles() {
        let (s, mesh) = render(flat_grid(65, 65), SurfaceOptions::default(), &overhead(Vec2::splat(32.0), 100.0));
        assert_eq!(s.leaf_count(), 2);
        assert_eq!(mesh.triangle_count(), 2);
        assert!((covered_area(&mesh) - 64.0 * 64.0).abs() < 1e-2);
    }

    #[test]
    fn test_non_power_of_two_grid_is_covered_exactly() {
        let (_, mesh) = render(flat_grid(20, 13), SurfaceOptions::default(), &overhead(Vec2::new(10.0, 6.0), 100.0));
        assert!((covered_area(&mesh) - 19.0 * 12.0).abs() < 1e-2);
        for v in &mesh.vertices {
            assert!(v.position[0] <= 19.0 && v.position[2] <= 12.0);
        }
    }

    #[test]
    fn test_adaptive_mesh_covers_grid() {
        let options = SurfaceOptions { pixel_error: 2.0, polygon_target: 0, ..Default::default() };
        let (s, mesh) = render(noise_grid(33), options, &overhead(Vec2::splat(160.0), 400.0));
        assert!(s.leaf_count() > 2);
        assert!(s.leaf_count() < 32 * 32 * 2);
        assert!((covered_area(&mesh) - 320.0 * 320.0).abs() < 1.0);
    }

    #[test]
    fn test_tiny_error_matches_height_queries() {
        let grid = noise_grid(17);
        let options = SurfaceOptions { pixel_error: 0.0, polygon_target: 0, ..Default::default() };
        let (s, mesh) = render(grid.clone(), options, &overhead(Vec2::splat(80.0), 400.0));
        assert_eq!(s.leaf_count(), 16 * 16 * 2);
        for t in mesh.all_triangles() {
            let p: Vec<Vec3> = t.iter().map(|&i| Vec3::from(mesh.vertices[i as usize].position)).collect();
            let centroid = (p[0] + p[1] + p[2]) / 3.0;
            let alt = grid.find_altitude_at_point(centroid, false).unwrap();
            assert!((alt - centroid.y).abs() < 1e-2);
        }
    }

    #[test]
    fn test_polygon_budget() {
        let options = SurfaceOptions { pixel_error: 0.01, polygon_target: 100, ..Default::default() };
        let (s, mesh) = render(noise_grid(33), options, &overhead(Vec2::splat(160.0), 10_000.0));
        assert!(s.stats().effective_pixel_error > 0.01);
        assert!(mesh.triangle_count() <= 100);
        assert_eq!(s.stats().drawn_triangles, mesh.triangle_count());
    }

    #[test]
    fn test_shared_vertices_and_strips() {
        let options = SurfaceOptions { pixel_error: 0.0, polygon_target: 0, prefer_strips: true, ..Default::default() };
        let (_, mesh) = render(noise_grid(9), options, &overhead(Vec2::splat(40.0), 400.0));
        assert_eq!(mesh.vertices.len(), 81);
        assert_eq!(mesh.all_triangles().len(), 128);
        assert!((covered_area(&mesh) - 80.0 * 80.0).abs() < 1.0);
    }

    #[test]
    fn test_camera_looking_away_culls_everything() {
        let cam = CameraSnapshot::look_at(Vec3::new(-1000.0, 50.0, -1000.0), Vec3::new(-1100.0, 50.0, -1100.0), Vec3::Y, 60.0, 1.5);
        let (s, mesh) = render(noise_grid(33), SurfaceOptions::default(), &cam);
        assert_eq!(s.leaf_count(), 0);
        assert!(mesh.is_empty());
    }

    #[test]
    fn test_surfaces_agree_on_queries() {
        let grid = noise_grid(33);
        let mut rtin = RtinSurface::new();
        rtin.init(grid.clone()).unwrap();
        let p = Vec3::new(123.4, 0.0, 77.7);
        assert_eq!(rtin.find_altitude_at_point(p, true), grid.find_altitude_at_point(p, false));
        assert_eq!(rtin.get_elevation(3, 4, true), grid.get_elevation(3, 4, true));
    }
}
