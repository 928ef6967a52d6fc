//! Immutable elevation grid with exact height and normal queries

use crate::core::error::Error;
use crate::core::types::{DVec2, Result, Vec2, Vec3};
use super::extents::{Extents, GridTransform, LinearUnits};
use super::source::ElevationSource;

/// Altitude and surface normal at a queried point
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfacePoint {
    pub altitude: f32,
    pub normal: Vec3,
}

/// Height and normal queries shared by every terrain representation.
///
/// `None` means no surface covers the point (outside the grid, or a hole in
/// paged data). It is never folded into an altitude of zero.
pub trait HeightQuery {
    /// Altitude under the world point's (x, z)
    fn find_altitude_at_point(&self, point: Vec3, include_external: bool) -> Option<f32>;

    /// Altitude plus the surface normal of the containing triangle
    fn find_altitude_with_normal(&self, point: Vec3, include_external: bool) -> Option<SurfacePoint>;

    /// World-space (x, z) rectangle covered, as (min, max)
    fn world_bounds(&self) -> (Vec2, Vec2);

    /// Horizontal distance between adjacent samples
    fn cell_size(&self) -> f32;
}

/// Whether cell (ix, iz) splits along the (ix+1, iz)-(ix, iz+1) diagonal.
///
/// Even cells split along (ix, iz)-(ix+1, iz+1). This checkerboard is the
/// rendered surface shape; meshes and queries must agree on it.
#[inline]
pub fn is_odd_cell(ix: usize, iz: usize) -> bool {
    (ix + iz) % 2 == 1
}

/// Corner indices of the cell triangle containing (fx, fz).
///
/// Corners are numbered 0 = (ix, iz), 1 = (ix+1, iz), 2 = (ix+1, iz+1), 3 = (ix, iz+1).
#[inline]
pub(crate) fn cell_triangle(fx: f32, fz: f32, odd: bool) -> [usize; 3] {
    match (odd, odd && fx + fz <= 1.0, !odd && fx > fz) {
        (true, true, _) => [0, 1, 3],
        (true, false, _) => [1, 2, 3],
        (false, _, true) => [0, 1, 2],
        (false, _, false) => [0, 2, 3],
    }
}

/// Height inside one cell from its four corners, using the cell's diagonal
#[inline]
pub(crate) fn interpolate_cell(h: [f32; 4], fx: f32, fz: f32, odd: bool) -> f32 {
    match cell_triangle(fx, fz, odd) {
        [0, 1, 3] => h[0] + (h[1] - h[0]) * fx + (h[3] - h[0]) * fz,
        [1, 2, 3] => h[2] + (h[3] - h[2]) * (1.0 - fx) + (h[1] - h[2]) * (1.0 - fz),
        [0, 1, 2] => h[0] + (h[1] - h[0]) * fx + (h[2] - h[1]) * fz,
        _ => h[0] + (h[2] - h[3]) * fx + (h[3] - h[0]) * fz,
    }
}

const CORNER_OFFSETS: [(f32, f32); 4] = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];

/// Row-major elevation samples over a rectangular earth extent.
///
/// Immutable once built; share it behind an `Arc`.
#[derive(Clone, Debug)]
pub struct HeightFieldGrid {
    cols: usize,
    rows: usize,
    transform: GridTransform,
    min_height: f32,
    max_height: f32,
    vertical_exaggeration: f32,
    heights: Vec<f32>,
}

impl HeightFieldGrid {
    /// Create a grid with every sample at `min_height`.
    ///
    /// Fails with `EmptyExtents` for degenerate extents and `InvalidGrid`
    /// for fewer than 2x2 samples.
    pub fn new(
        units: LinearUnits,
        extents: Extents,
        min_height: f32,
        max_height: f32,
        cols: usize,
        rows: usize,
    ) -> Result<Self> {
        let transform = GridTransform::new(units, extents, cols, rows)?;
        Ok(Self {
            cols,
            rows,
            transform,
            min_height,
            max_height: max_height.max(min_height),
            vertical_exaggeration: 1.0,
            heights: vec![min_height; cols * rows],
        })
    }

    /// Replace the samples (row-major, `cols * rows` values)
    pub fn with_samples(mut self, heights: Vec<f32>) -> Result<Self> {
        if heights.len() != self.cols * self.rows {
            return Err(Error::InvalidGrid(format!(
                "expected {} samples for {}x{}, got {}",
                self.cols * self.rows, self.cols, self.rows, heights.len()
            )));
        }
        for &h in &heights {
            self.min_height = self.min_height.min(h);
            self.max_height = self.max_height.max(h);
        }
        self.heights = heights;
        Ok(self)
    }

    /// Scale all rendered heights by `factor`; true elevations are unchanged
    pub fn with_vertical_exaggeration(mut self, factor: f32) -> Self {
        self.vertical_exaggeration = factor;
        self
    }

    /// Build a grid by sampling an external elevation source
    pub fn from_source(source: &dyn ElevationSource) -> Result<Self> {
        let (cols, rows) = source.dimensions();
        let (min_h, max_h) = source.height_range();
        let grid = Self::new(source.units(), source.extents(), min_h, max_h, cols, rows)?;
        let mut heights = Vec::with_capacity(cols * rows);
        for row in 0..rows {
            for col in 0..cols {
                heights.push(source.elevation(col, row));
            }
        }
        grid.with_samples(heights)
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn transform(&self) -> &GridTransform {
        &self.transform
    }

    pub fn extents(&self) -> Extents {
        self.transform.extents
    }

    pub fn units(&self) -> LinearUnits {
        self.transform.units
    }

    pub fn spacing(&self) -> Vec2 {
        self.transform.spacing
    }

    pub fn vertical_exaggeration(&self) -> f32 {
        self.vertical_exaggeration
    }

    /// Rendered (exaggerated) height range
    pub fn height_range(&self) -> (f32, f32) {
        let (a, b) = (self.min_height * self.vertical_exaggeration, self.max_height * self.vertical_exaggeration);
        (a.min(b), a.max(b))
    }

    /// Stored elevation range, without exaggeration
    pub fn true_height_range(&self) -> (f32, f32) {
        (self.min_height, self.max_height)
    }

    /// O(1) sample lookup; `true_elevation` skips vertical exaggeration
    pub fn get_elevation(&self, col: usize, row: usize, true_elevation: bool) -> Option<f32> {
        if col >= self.cols || row >= self.rows {
            return None;
        }
        let h = self.heights[row * self.cols + col];
        Some(if true_elevation { h } else { h * self.vertical_exaggeration })
    }

    /// Rendered height with indices clamped into the grid
    #[inline]
    pub fn sample_clamped(&self, col: usize, row: usize) -> f32 {
        let col = col.min(self.cols - 1);
        let row = row.min(self.rows - 1);
        self.heights[row * self.cols + col] * self.vertical_exaggeration
    }

    /// World position of a sample
    pub fn sample_position(&self, col: usize, row: usize) -> Vec3 {
        self.transform.grid_to_world(col as f32, row as f32, self.sample_clamped(col, row))
    }

    /// Smooth vertex normal from central differences
    pub fn sample_normal(&self, col: usize, row: usize) -> Vec3 {
        let (c0, c1) = (col.saturating_sub(1), (col + 1).min(self.cols - 1));
        let (r0, r1) = (row.saturating_sub(1), (row + 1).min(self.rows - 1));
        let spacing = self.spacing();
        let dhdx = (self.sample_clamped(c1, row) - self.sample_clamped(c0, row)) / ((c1 - c0) as f32 * spacing.x);
        let dhdz = (self.sample_clamped(col, r1) - self.sample_clamped(col, r0)) / ((r1 - r0) as f32 * spacing.y);
        Vec3::new(-dhdx, 1.0, -dhdz).normalize()
    }

    /// Altitude at an earth coordinate
    pub fn find_altitude_on_earth(&self, earth: DVec2) -> Option<f32> {
        let world = self.transform.earth_to_world(earth);
        self.find_altitude_at_point(Vec3::new(world.x, 0.0, world.y), false)
    }

    /// Query at fractional grid indices (x = col, y = row).
    ///
    /// Same rules as the world-space queries; the normal is `Vec3::Y` unless
    /// `want_normal` is set.
    pub fn find_altitude_at_grid(&self, g: Vec2, want_normal: bool) -> Option<SurfacePoint> {
        let (max_x, max_z) = ((self.cols - 1) as f32, (self.rows - 1) as f32);
        if !(g.x >= 0.0 && g.y >= 0.0 && g.x <= max_x && g.y <= max_z) {
            return None;
        }
        let ix = (g.x as usize).min(self.cols - 1);
        let iz = (g.y as usize).min(self.rows - 1);

        // Exactly on the right/top edge there is no cell to interpolate in
        if ix == self.cols - 1 || iz == self.rows - 1 {
            return Some(SurfacePoint { altitude: self.sample_clamped(ix, iz), normal: Vec3::Y });
        }

        let fx = g.x - ix as f32;
        let fz = g.y - iz as f32;
        let h = [
            self.sample_clamped(ix, iz),
            self.sample_clamped(ix + 1, iz),
            self.sample_clamped(ix + 1, iz + 1),
            self.sample_clamped(ix, iz + 1),
        ];
        let odd = is_odd_cell(ix, iz);
        let altitude = interpolate_cell(h, fx, fz, odd);

        let normal = if want_normal {
            let spacing = self.spacing();
            let corner = |k: usize| {
                let (ox, oz) = CORNER_OFFSETS[k];
                Vec3::new(ox * spacing.x, h[k], oz * spacing.y)
            };
            let [a, b, c] = cell_triangle(fx, fz, odd);
            let (pa, pb, pc) = (corner(a), corner(b), corner(c));
            let n = (pb - pa).cross(pc - pa);
            let n = if n.y < 0.0 { -n } else { n };
            n.normalize()
        } else {
            Vec3::Y
        };

        Some(SurfacePoint { altitude, normal })
    }
}

impl HeightQuery for HeightFieldGrid {
    fn find_altitude_at_point(&self, point: Vec3, _include_external: bool) -> Option<f32> {
        self.find_altitude_at_grid(self.transform.world_to_grid(point.x, point.z), false)
            .map(|s| s.altitude)
    }

    fn find_altitude_with_normal(&self, point: Vec3, _include_external: bool) -> Option<SurfacePoint> {
        self.find_altitude_at_grid(self.transform.world_to_grid(point.x, point.z), true)
    }

    fn world_bounds(&self) -> (Vec2, Vec2) {
        (Vec2::ZERO, self.transform.world_size())
    }

    fn cell_size(&self) -> f32 {
        self.spacing().min_element()
    }
}
