//! Tile-set authoring: cut an elevation source into paged tiles

use std::path::Path;
use std::time::Instant;

use image::{ImageBuffer, Luma, Rgb, RgbImage};

use crate::core::error::Error;
use crate::core::types::{DVec2, Result, Vec3};
use crate::heightfield::{ElevationSource, HeightFieldGrid, HeightQuery};
use super::manifest::{TileManifest, MANIFEST_FILE};

/// Largest raw value of a 16-bit elevation raster
const RAW_MAX: f32 = u16::MAX as f32;

/// Write `columns x rows` tiles of `source` plus the manifest into `dir`.
///
/// Each tile gets a 16-bit PGM of `samples_per_tile` squared samples and
/// a shaded-relief PPM of `image_size` squared texels. Neighbouring tiles
/// repeat their shared edge samples.
pub fn write_tileset(
    dir: &Path,
    source: &dyn ElevationSource,
    columns: u32,
    rows: u32,
    samples_per_tile: u32,
    image_size: u32,
    crs: &str,
) -> Result<TileManifest> {
    if samples_per_tile < 2 || image_size == 0 {
        return Err(Error::InvalidGrid(format!(
            "tiles need at least 2 samples and 1 texel, got {} and {}",
            samples_per_tile, image_size
        )));
    }
    let start = Instant::now();
    let grid = HeightFieldGrid::from_source(source)?;
    let (lo, hi) = grid.height_range();

    let mut manifest = TileManifest::new(columns, rows, image_size, source.extents(), crs);
    manifest.height_offset = lo;
    manifest.height_scale = if hi > lo { (hi - lo) / RAW_MAX } else { 1.0 };
    let layout = manifest.layout()?;
    std::fs::create_dir_all(dir)?;

    let span = (samples_per_tile - 1) as usize;
    let (nx, nz) = (columns as usize * span + 1, rows as usize * span + 1);
    let extents = source.extents();
    let sample = |gx: usize, gz: usize| {
        let earth = DVec2::new(
            extents.left + extents.width() * gx as f64 / (nx - 1) as f64,
            extents.bottom + extents.height() * gz as f64 / (nz - 1) as f64,
        );
        grid.find_altitude_on_earth(earth).unwrap_or_else(|| {
            // Rounding can push the far edge just outside the grid
            let col = (gx as f64 / (nx - 1) as f64 * (grid.cols() - 1) as f64).round() as usize;
            let row = (gz as f64 / (nz - 1) as f64 * (grid.rows() - 1) as f64).round() as usize;
            grid.sample_clamped(col, row)
        })
    };

    for id in manifest.tile_ids() {
        let (c0, r0) = (id.col as usize * span, id.row as usize * span);
        let elevation: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(samples_per_tile, samples_per_tile, |x, y| {
                let h = sample(c0 + x as usize, r0 + span - y as usize);
                let raw = ((h - manifest.height_offset) / manifest.height_scale).round();
                Luma([raw.clamp(0.0, RAW_MAX) as u16])
            });
        elevation.save(id.elevation_path(dir))?;

        let tile = layout.tile_extents(id);
        let image: RgbImage = ImageBuffer::from_fn(image_size, image_size, |px, py| {
            let u = (px as f64 + 0.5) / image_size as f64;
            let v = 1.0 - (py as f64 + 0.5) / image_size as f64;
            let earth = DVec2::new(tile.left + tile.width() * u, tile.bottom + tile.height() * v);
            let world = grid.transform().earth_to_world(earth);
            match grid.find_altitude_with_normal(Vec3::new(world.x, 0.0, world.y), false) {
                Some(p) => relief_color(p.altitude, p.normal, lo, hi),
                None => Rgb([0, 0, 0]),
            }
        });
        image.save(id.image_path(dir))?;
    }

    manifest.save(&dir.join(MANIFEST_FILE))?;
    log::info!(
        "Wrote {}x{} tiles ({} samples, {} px) to {} in {:.1}ms",
        columns, rows, samples_per_tile, image_size, dir.display(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(manifest)
}

/// Hypsometric tint lit from the north-west
fn relief_color(altitude: f32, normal: Vec3, lo: f32, hi: f32) -> Rgb<u8> {
    const STOPS: [(f32, [f32; 3]); 3] = [
        (0.0, [62.0, 118.0, 52.0]),
        (0.6, [138.0, 112.0, 72.0]),
        (1.0, [236.0, 236.0, 236.0]),
    ];
    let t = if hi > lo { ((altitude - lo) / (hi - lo)).clamp(0.0, 1.0) } else { 0.0 };
    let k = if t <= STOPS[1].0 { 0 } else { 1 };
    let (t0, a) = STOPS[k];
    let (t1, b) = STOPS[k + 1];
    let f = (t - t0) / (t1 - t0);

    let light = Vec3::new(-1.0, 1.5, 1.0).normalize();
    let shade = 0.35 + 0.65 * normal.dot(light).clamp(0.0, 1.0);
    let channel = |i: usize| ((a[i] + (b[i] - a[i]) * f) * shade).round().clamp(0.0, 255.0) as u8;
    Rgb([channel(0), channel(1), channel(2)])
}
