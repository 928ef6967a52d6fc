//! Headless flythrough over a procedural or paged terrain.
//!
//! Usage: cargo run --release --bin flythrough -- [OPTIONS]
//!
//! Options:
//!   --size <N>            Grid samples per side (default: 257)
//!   --seed <SEED>         Noise seed (default: 12345)
//!   --strategy <NAME>     patch | rtin (default: patch)
//!   --frames <N>          Frames to run (default: 120)
//!   --config <FILE>       JSON surface and paging options
//!   --write-tiles <DIR>   Cut the generated terrain into a tile set first
//!   --tiles <DIR>         Fly over a tile set instead of the in-memory grid

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec3;

use terrastream::core::config::TerrainConfig;
use terrastream::terrain::{TerrainGenerator, TerrainParams};
use terrastream::streaming::write_tileset;
use terrastream::{
    create_surface, CameraSnapshot, DynamicTerrainSurface, Extents, HeightFieldGrid, HeightQuery, SurfaceKind, TerrainMesh,
    TiledTerrain, Topology,
};

/// Side of the generated terrain in metres
const WORLD_SIZE: f64 = 4096.0;
/// Camera height above the ground
const EYE_HEIGHT: f32 = 60.0;
const TILES_PER_SIDE: u32 = 4;

fn main() {
    terrastream::core::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let size = parse_arg::<usize>(&args, "--size").unwrap_or(257);
    let seed = parse_arg::<u32>(&args, "--seed").unwrap_or(12345);
    let frames = parse_arg::<u32>(&args, "--frames").unwrap_or(120);
    let strategy = parse_arg::<SurfaceKind>(&args, "--strategy").unwrap_or_default();
    let write_dir = parse_arg::<PathBuf>(&args, "--write-tiles");
    let tile_dir = parse_arg::<PathBuf>(&args, "--tiles");

    let config = match parse_arg::<PathBuf>(&args, "--config") {
        Some(path) => match TerrainConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Failed to load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => TerrainConfig::default(),
    };

    let extents = Extents::new(0.0, WORLD_SIZE, 0.0, WORLD_SIZE);
    let generator = TerrainGenerator::new(TerrainParams { seed, ..Default::default() }, extents, size, size);

    if let Some(dir) = &write_dir {
        let samples = ((size - 1) / TILES_PER_SIDE as usize + 1) as u32;
        if let Err(e) = write_tileset(dir, &generator, TILES_PER_SIDE, TILES_PER_SIDE, samples, 256, "LOCAL_CS[\"metre\"]") {
            log::error!("Failed to write tile set: {}", e);
            std::process::exit(1);
        }
    }

    let result = match tile_dir.or(write_dir) {
        Some(dir) => fly_tiles(&dir, &config, frames),
        None => fly_surface(&generator, strategy, &config, frames),
    };
    if let Err(e) = result {
        log::error!("Flythrough failed: {}", e);
        std::process::exit(1);
    }
}

/// Camera for frame `i`: a circle around the centre of `(min, max)`
fn camera_for(i: u32, frames: u32, min: glam::Vec2, max: glam::Vec2, ground: impl Fn(Vec3) -> Option<f32>) -> CameraSnapshot {
    let center = (min + max) * 0.5;
    let radius = (max - min).min_element() * 0.35;
    let angle = i as f32 / frames.max(1) as f32 * std::f32::consts::TAU;
    let mut eye = Vec3::new(center.x + radius * angle.cos(), 0.0, center.y + radius * angle.sin());
    eye.y = ground(eye).unwrap_or(0.0) + EYE_HEIGHT;
    let ahead = Vec3::new(-angle.sin(), -0.15, angle.cos());
    CameraSnapshot::look_at(eye, eye + ahead, Vec3::Y, 75.0, 16.0 / 9.0).with_clip(1.0, radius * 2.0)
}

fn fly_surface(
    generator: &TerrainGenerator,
    strategy: SurfaceKind,
    config: &TerrainConfig,
    frames: u32,
) -> terrastream::Result<()> {
    let start = Instant::now();
    let grid = Arc::new(HeightFieldGrid::from_source(generator)?);
    log::info!("Built {}x{} grid in {:.1}ms", grid.cols(), grid.rows(), start.elapsed().as_secs_f64() * 1000.0);

    let mut surface = create_surface(strategy);
    surface.set_options(config.surface.clone());
    surface.init(Arc::clone(&grid))?;

    let topology = if config.surface.prefer_strips { Topology::TriangleStrip } else { Topology::TriangleList };
    let mut mesh = TerrainMesh::new(topology);
    let (min, max) = grid.world_bounds();
    let dt = Duration::from_millis(16);
    let mut triangles = 0usize;

    let start = Instant::now();
    for i in 0..frames {
        let camera = camera_for(i, frames, min, max, |p| grid.find_altitude_at_point(p, false));
        surface.frame(&camera, dt, &mut mesh);
        let stats = surface.stats();
        triangles += stats.drawn_triangles;
        log::debug!(
            "Frame {}: {} triangles, {} patches, pixel error {:.2}",
            i, stats.drawn_triangles, stats.visible_patches, stats.effective_pixel_error
        );
    }
    log::info!(
        "{} surface: {} frames in {:.1}ms, {:.0} triangles per frame",
        surface.name(), frames, start.elapsed().as_secs_f64() * 1000.0,
        triangles as f64 / frames.max(1) as f64
    );
    Ok(())
}

fn fly_tiles(dir: &std::path::Path, config: &TerrainConfig, frames: u32) -> terrastream::Result<()> {
    let mut terrain = TiledTerrain::open(dir, config.paging.clone())?;
    let mut mesh = TerrainMesh::new(Topology::TriangleList);
    let (min, max) = terrain.world_bounds();

    let start = Instant::now();
    let mut stats = terrain.stats();
    for i in 0..frames {
        let camera = camera_for(i, frames, min, max, |p| terrain.find_altitude_at_point(p, false));
        stats = terrain.render(&camera, &mut mesh);
        // Give the loader a moment, as a real frame would
        std::thread::sleep(Duration::from_millis(2));
    }
    log::info!(
        "Tiled terrain: {} frames in {:.1}ms, {} loads, {} evictions, {} resident, {} missing",
        frames, start.elapsed().as_secs_f64() * 1000.0,
        stats.loads_committed, stats.evicted, stats.resident, stats.missing
    );
    Ok(())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
