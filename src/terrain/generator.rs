//! Noise-based procedural elevation

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use crate::heightfield::{ElevationSource, Extents, LinearUnits};

/// Parameters controlling terrain generation
#[derive(Clone, Debug)]
pub struct TerrainParams {
    pub seed: u32,
    pub scale: f32,        // Horizontal scale in metres (larger = smoother)
    pub height_scale: f32, // Vertical scale (max height)
    pub octaves: u32,      // FBM octaves (detail levels)
    pub persistence: f32,  // FBM persistence (0.5 typical)
    pub lacunarity: f32,   // FBM lacunarity (2.0 typical)
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            scale: 400.0,
            height_scale: 120.0,
            octaves: 5,
            persistence: 0.5,
            lacunarity: 2.0,
        }
    }
}

/// Procedural elevation using fractal Brownian motion (FBM), sampled on a
/// regular grid over `extents`.
pub struct TerrainGenerator {
    params: TerrainParams,
    noise: Fbm<Perlin>,
    extents: Extents,
    cols: usize,
    rows: usize,
}

impl TerrainGenerator {
    pub fn new(params: TerrainParams, extents: Extents, cols: usize, rows: usize) -> Self {
        let noise = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves as usize)
            .set_persistence(params.persistence as f64)
            .set_lacunarity(params.lacunarity as f64);

        Self { params, noise, extents, cols, rows }
    }

    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    /// Height at earth position (x, y) in metres
    pub fn height_at(&self, x: f64, y: f64) -> f32 {
        let scale = self.params.scale as f64;
        let noise_value = self.noise.get([x / scale, y / scale]);
        // Map [-1, 1] to [0, height_scale]
        let normalized = ((noise_value + 1.0) / 2.0).clamp(0.0, 1.0);
        (normalized * self.params.height_scale as f64) as f32
    }

    /// Earth coordinate of sample (col, row)
    pub fn sample_earth(&self, col: usize, row: usize) -> (f64, f64) {
        let fx = col as f64 / (self.cols.max(2) - 1) as f64;
        let fy = row as f64 / (self.rows.max(2) - 1) as f64;
        (
            self.extents.left + fx * self.extents.width(),
            self.extents.bottom + fy * self.extents.height(),
        )
    }
}

impl ElevationSource for TerrainGenerator {
    fn extents(&self) -> Extents {
        self.extents
    }

    fn units(&self) -> LinearUnits {
        LinearUnits::Meters
    }

    fn dimensions(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    fn height_range(&self) -> (f32, f32) {
        (0.0, self.params.height_scale)
    }

    fn elevation(&self, col: usize, row: usize) -> f32 {
        let (x, y) = self.sample_earth(col, row);
        self.height_at(x, y)
    }
}
