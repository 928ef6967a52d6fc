//! Out-of-core terrain paged from a tile set
//!
//! One `render` call is one frame and runs five checkpoints in order:
//!
//! 1. commit loads the loader has finished,
//! 2. visibility, level selection and new load requests,
//! 3. expiration of tiles outside the preload radius,
//! 4. mesh emission for visible resident tiles,
//! 5. removal of evicted tiles.
//!
//! Tile state only changes at these checkpoints, on the calling thread.
//! Height and ray queries read whatever the last frame committed.

use std::collections::HashSet;
use std::path::Path;

use crate::core::camera::CameraSnapshot;
use crate::core::types::{Result, Vec2, Vec3};
use crate::heightfield::grid::is_odd_cell;
use crate::heightfield::{HeightQuery, SurfacePoint};
use crate::math::Frustum;
use crate::mesh::{BatchMaterial, TerrainMesh};
use crate::clod::patch::axis_samples;
use super::cache::{PendingLoad, TileCache};
use super::config::PagingConfig;
use super::loader::{InlineTileLoader, LoadRequest, LoadResult, ThreadedTileLoader, TileLoader};
use super::lod::{decide_level, desired_level, geometry_stride, max_texture_level, LevelChange};
use super::manifest::{TileManifest, MANIFEST_FILE};
use super::tile::{Tile, TileData, TileId, TileLayout, TileState, TileStore};

/// Cells per tile assumed for ray marching while nothing is resident
const FALLBACK_CELLS_PER_TILE: f32 = 64.0;

/// Paging counters, refreshed every frame
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PagingStats {
    pub frame: u64,
    /// Tiles holding committed data
    pub resident: usize,
    /// Loads in flight plus loads waiting for a slot
    pub pending: usize,
    pub visible: usize,
    pub loads_issued: u64,
    pub loads_committed: u64,
    pub evicted: u64,
    /// Tiles whose data could not be read
    pub missing: usize,
    pub drawn_triangles: usize,
}

pub struct TiledTerrain {
    manifest: TileManifest,
    layout: TileLayout,
    paging: PagingConfig,
    cache: TileCache,
    loader: Box<dyn TileLoader>,
    missing: HashSet<TileId>,
    /// Next tile visited by the round-robin planner
    cursor: usize,
    frame: u64,
    stats: PagingStats,
}

impl TiledTerrain {
    /// Open the tile set in `dir` with a background loader
    pub fn open(dir: &Path, paging: PagingConfig) -> Result<Self> {
        let manifest = TileManifest::load(&dir.join(MANIFEST_FILE))?;
        let store = TileStore::new(dir, manifest.clone())?;
        let loader = ThreadedTileLoader::new(store, paging.max_in_flight)?;
        Self::with_loader(manifest, paging, Box::new(loader))
    }

    /// Open the tile set in `dir`, decoding on the calling thread
    pub fn open_inline(dir: &Path, paging: PagingConfig) -> Result<Self> {
        let manifest = TileManifest::load(&dir.join(MANIFEST_FILE))?;
        let store = TileStore::new(dir, manifest.clone())?;
        Self::with_loader(manifest, paging, Box::new(InlineTileLoader::new(store)))
    }

    /// Terrain over `manifest` fed by any loader.
    ///
    /// Fails with `EmptyExtents` for degenerate manifest extents.
    pub fn with_loader(manifest: TileManifest, paging: PagingConfig, loader: Box<dyn TileLoader>) -> Result<Self> {
        let layout = manifest.layout()?;
        log::info!(
            "Tiled terrain: {}x{} tiles, {:.0}x{:.0} world units",
            layout.columns, layout.rows, layout.world_size().x, layout.world_size().y
        );
        Ok(Self {
            manifest,
            layout,
            cache: TileCache::new(paging.cache_capacity),
            paging,
            loader,
            missing: HashSet::new(),
            cursor: 0,
            frame: 0,
            stats: PagingStats::default(),
        })
    }

    pub fn manifest(&self) -> &TileManifest {
        &self.manifest
    }

    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    pub fn paging(&self) -> &PagingConfig {
        &self.paging
    }

    /// Replace the paging configuration; applies from the next frame
    pub fn set_paging(&mut self, paging: PagingConfig) {
        self.cache.set_capacity(paging.cache_capacity);
        self.paging = paging;
    }

    pub fn stats(&self) -> PagingStats {
        self.stats
    }

    pub fn tile_state(&self, id: TileId) -> TileState {
        self.cache.get(id).map_or(TileState::Unloaded, |t| t.state)
    }

    /// Level of the tile's committed data
    pub fn tile_level(&self, id: TileId) -> Option<u32> {
        self.cache.get(id).and_then(|t| t.level())
    }

    /// Frames left before the tile is evicted
    pub fn expiration(&self, id: TileId) -> Option<u32> {
        self.cache.expiration(id)
    }

    pub fn is_missing(&self, id: TileId) -> bool {
        self.missing.contains(&id)
    }

    /// Tiles with committed data, sorted
    pub fn resident_tiles(&self) -> Vec<TileId> {
        let mut ids: Vec<TileId> = self.cache.tiles().filter(|t| t.data.is_some()).map(|t| t.id).collect();
        ids.sort();
        ids
    }

    /// Run one frame and emit the visible tiles into `mesh`
    pub fn render(&mut self, camera: &CameraSnapshot, mesh: &mut TerrainMesh) -> PagingStats {
        self.frame += 1;
        let eye = camera.position;
        let preload = self.paging.preload_distance(camera.far);

        // Phase 1: commit
        self.commit_loads();

        // Phase 2: visibility, levels, requests
        let frustum = Frustum::from_camera(camera);
        let visible = self.update_visibility(&frustum, camera);
        self.plan(eye, preload);
        self.issue_requests(eye);

        // Phase 3: expiration
        self.expire(eye, preload);

        // Phase 4: emission
        self.emit(&visible, mesh);

        // Phase 5: eviction
        self.remove_evicted();

        self.stats.frame = self.frame;
        self.stats.resident = self.cache.tiles().filter(|t| t.data.is_some()).count();
        self.stats.pending = self.loader.in_flight() + self.cache.pending().len();
        self.stats.visible = visible.len();
        self.stats.missing = self.missing.len();
        self.stats.drawn_triangles = mesh.triangle_count();
        log::debug!(
            "Frame {}: {} resident, {} pending, {} visible, {} triangles",
            self.frame, self.stats.resident, self.stats.pending, self.stats.visible, self.stats.drawn_triangles
        );
        self.stats
    }

    fn commit_loads(&mut self) {
        for result in self.loader.poll() {
            match result {
                LoadResult::Loaded(data) => {
                    let id = data.id;
                    match self.cache.get_mut(id) {
                        Some(tile) if tile.requested_level == Some(data.level) => {
                            log::debug!("Tile {} resident at level {}", id, data.level);
                            tile.commit(data);
                            self.stats.loads_committed += 1;
                        }
                        _ => log::debug!("Dropping stale load of tile {}", id),
                    }
                }
                LoadResult::Failed { id, error } => {
                    log::warn!("Tile {} stays unloaded: {}", id, error);
                    self.missing.insert(id);
                    let has_data = self.cache.get(id).map(|t| t.data.is_some());
                    match has_data {
                        Some(true) => {
                            if let Some(tile) = self.cache.get_mut(id) {
                                tile.requested_level = None;
                            }
                        }
                        Some(false) => {
                            self.cache.remove(id);
                        }
                        None => {}
                    }
                }
            }
        }
    }

    /// Flag renderable tiles inside the view; returns them sorted
    fn update_visibility(&mut self, frustum: &Frustum, camera: &CameraSnapshot) -> Vec<TileId> {
        let mut visible = Vec::new();
        for id in self.cache.ids() {
            let sphere = self.cache.get(id).and_then(|t| t.data.as_ref()).map(|d| self.tile_sphere(d));
            let in_view = match sphere {
                Some((center, radius)) => {
                    self.tile_distance(id, camera.position) <= camera.far
                        && frustum.test_sphere(center, radius).is_visible()
                }
                None => false,
            };
            if let Some(tile) = self.cache.get_mut(id) {
                tile.visible = in_view && tile.is_renderable();
                if tile.visible {
                    visible.push(id);
                }
            }
        }
        visible.sort();
        visible
    }

    /// Round-robin load and level decisions under the update budget
    fn plan(&mut self, eye: Vec3, preload: f32) {
        let layout = self.layout;
        self.cache.retain_pending(|p| {
            p.distance = layout.horizontal_distance(p.id, eye);
            p.distance <= preload
        });

        let count = self.layout.tile_count();
        if count == 0 {
            return;
        }
        for _ in 0..self.paging.tiles_per_frame(count) {
            let id = self.layout.id_at(self.cursor);
            self.cursor = (self.cursor + 1) % count;
            self.plan_tile(id, eye, preload);
        }
    }

    fn plan_tile(&mut self, id: TileId, eye: Vec3, preload: f32) {
        if self.missing.contains(&id) {
            return;
        }
        let distance = self.tile_distance(id, eye);
        if distance > preload {
            return;
        }
        let max_level = max_texture_level(self.paging.base_texture_size);
        let desired = desired_level(distance, self.paging.enabling_range, max_level);

        let current = match self.cache.get(id) {
            None => {
                self.cache.enqueue(PendingLoad { id, level: desired, distance });
                return;
            }
            Some(tile) if tile.state == TileState::Resident && tile.requested_level.is_none() => tile.level(),
            Some(_) => None,
        };
        let Some(current) = current else { return };

        match decide_level(current, desired, self.paging.paging_aggressiveness, self.paging.lazyness) {
            LevelChange::Keep => {}
            LevelChange::Coarsen(level) => {
                let base = self.paging.base_texture_size;
                if let Some(tile) = self.cache.get_mut(id) {
                    tile.data = tile.data.as_ref().map(|d| d.coarsened(level, base));
                    log::debug!("Tile {} coarsened {} -> {}", id, current, level);
                }
            }
            LevelChange::Refine(level) => self.cache.enqueue(PendingLoad { id, level, distance }),
        }
    }

    /// Hand queued loads to the loader, nearest first, up to `max_in_flight`
    fn issue_requests(&mut self, eye: Vec3) {
        while self.loader.in_flight() < self.paging.max_in_flight.max(1) {
            let Some(load) = self.cache.dequeue_nearest() else { break };
            if self.missing.contains(&load.id) || self.loader.is_pending(load.id) {
                continue;
            }

            let inserted = match self.cache.get_mut(load.id) {
                Some(tile) => {
                    if tile.state != TileState::Resident || tile.requested_level.is_some() {
                        continue;
                    }
                    tile.requested_level = Some(load.level);
                    false
                }
                None => {
                    if self.cache.is_full() {
                        // Only a farther off-screen tile gives up its slot
                        let victim = self
                            .cache
                            .oldest_evictable()
                            .filter(|&victim| self.tile_distance(victim, eye) > load.distance);
                        match victim.and_then(|victim| self.cache.remove(victim)) {
                            Some(evicted) => self.on_evicted(evicted),
                            None => {
                                self.cache.enqueue(load);
                                break;
                            }
                        }
                    }
                    self.cache.insert(Tile::pending(load.id, load.level), self.paging.expiration);
                    true
                }
            };

            let request = LoadRequest {
                id: load.id,
                level: load.level,
                base_texture_size: self.paging.base_texture_size,
                priority: -load.distance,
            };
            if self.loader.request(request) {
                self.stats.loads_issued += 1;
            } else if inserted {
                self.cache.remove(load.id);
            } else if let Some(tile) = self.cache.get_mut(load.id) {
                tile.requested_level = None;
            }
        }
    }

    fn on_evicted(&mut self, tile: Tile) {
        if tile.requested_level.is_some() {
            self.loader.cancel(tile.id);
        }
        self.stats.evicted += 1;
        log::debug!("Evicted tile {} to make room", tile.id);
    }

    fn expire(&mut self, eye: Vec3, preload: f32) {
        let expiration = self.paging.expiration;
        for id in self.cache.ids() {
            if self.tile_distance(id, eye) <= preload {
                self.cache.reset_expiration(id, expiration);
                continue;
            }

            // Leaving the preload radius cancels any outstanding load
            let mut unloaded = false;
            if let Some(tile) = self.cache.get_mut(id) {
                if tile.requested_level.take().is_some() {
                    self.loader.cancel(id);
                }
                if tile.data.is_none() {
                    tile.state = TileState::Evicting;
                    unloaded = true;
                }
            }
            if unloaded || expiration == 0 {
                continue;
            }

            if self.cache.tick_expiration(id) == 0 {
                if let Some(tile) = self.cache.get_mut(id) {
                    tile.state = TileState::Evicting;
                    tile.visible = false;
                }
            }
        }
    }

    fn emit(&mut self, visible: &[TileId], mesh: &mut TerrainMesh) {
        mesh.clear(mesh.topology);
        for &id in visible {
            let Some(tile) = self.cache.get_mut(id) else { continue };
            if !tile.is_renderable() {
                continue;
            }
            tile.last_drawn = self.frame;
            let Some(data) = tile.data.clone() else { continue };
            emit_tile(mesh, &self.layout, &data, self.paging.max_geometry_level);
            self.cache.touch(id);
        }
        mesh.drop_empty_batches();
    }

    fn remove_evicted(&mut self) {
        let evicting: Vec<TileId> = self
            .cache
            .tiles()
            .filter(|t| t.state == TileState::Evicting)
            .map(|t| t.id)
            .collect();
        for id in evicting {
            if let Some(tile) = self.cache.remove(id) {
                if tile.data.is_some() {
                    self.stats.evicted += 1;
                    log::debug!("Evicted tile {}", id);
                }
            }
        }
    }

    /// Distance from `eye` to the tile's box (height range only when resident)
    fn tile_distance(&self, id: TileId, eye: Vec3) -> f32 {
        let horizontal = self.layout.horizontal_distance(id, eye);
        let vertical = match self.cache.get(id).and_then(|t| t.data.as_ref()) {
            Some(data) => {
                let (lo, hi) = data.grid.height_range();
                (lo - eye.y).max(eye.y - hi).max(0.0)
            }
            None => 0.0,
        };
        (horizontal * horizontal + vertical * vertical).sqrt()
    }

    fn tile_sphere(&self, data: &TileData) -> (Vec3, f32) {
        let (min, max) = self.layout.tile_world_bounds(data.id);
        let (lo, hi) = data.grid.height_range();
        let lo3 = Vec3::new(min.x, lo, min.y);
        let hi3 = Vec3::new(max.x, hi, max.y);
        ((lo3 + hi3) * 0.5, (hi3 - lo3).length() * 0.5)
    }

    fn query(&self, xz: Vec2, want_normal: bool) -> Option<SurfacePoint> {
        let id = self.layout.tile_at_world(xz)?;
        let data = self.cache.get(id)?.data.as_ref()?;
        let (min, max) = self.layout.tile_world_bounds(id);
        let uv = ((xz - min) / (max - min)).clamp(Vec2::ZERO, Vec2::ONE);
        let cells = Vec2::new((data.grid.cols() - 1) as f32, (data.grid.rows() - 1) as f32);
        data.grid.find_altitude_at_grid(uv * cells, want_normal)
    }

    /// Altitude at a world (x, z) from whichever resident tile covers it.
    ///
    /// `None` marks a hole (tile not resident) and is never reported as zero.
    pub fn get_altitude(&self, xz: Vec2) -> Option<f32> {
        self.query(xz, false).map(|p| p.altitude)
    }

    /// First intersection of a ray with the resident terrain
    pub fn cast_ray_to_surface(&self, origin: Vec3, direction: Vec3) -> Option<Vec3> {
        crate::heightfield::cast_ray_to_surface(self, origin, direction)
    }
}

impl HeightQuery for TiledTerrain {
    fn find_altitude_at_point(&self, point: Vec3, _include_external: bool) -> Option<f32> {
        self.get_altitude(Vec2::new(point.x, point.z))
    }

    fn find_altitude_with_normal(&self, point: Vec3, _include_external: bool) -> Option<SurfacePoint> {
        self.query(Vec2::new(point.x, point.z), true)
    }

    fn world_bounds(&self) -> (Vec2, Vec2) {
        (Vec2::ZERO, self.layout.world_size())
    }

    fn cell_size(&self) -> f32 {
        self.cache
            .tiles()
            .filter_map(|t| t.data.as_ref())
            .map(|d| d.grid.cell_size())
            .reduce(f32::min)
            .unwrap_or_else(|| self.layout.tile_world_size().min_element() / FALLBACK_CELLS_PER_TILE)
    }
}

/// Mesh one tile at its level's geometry stride, with skirts on all borders
fn emit_tile(mesh: &mut TerrainMesh, layout: &TileLayout, data: &TileData, max_geometry_level: u32) {
    let grid = &data.grid;
    let (cols, rows) = (grid.cols(), grid.rows());
    let stride = geometry_stride(data.level, max_geometry_level).min(cols - 1).min(rows - 1).max(1);
    let xs = axis_samples(0, cols - 1, stride);
    let zs = axis_samples(0, rows - 1, stride);
    let (min, max) = layout.tile_world_bounds(data.id);
    let size = max - min;

    mesh.begin_batch(BatchMaterial::TileImage { tile: data.id, level: data.level });
    let base = mesh.vertices.len() as u32;
    for &z in &zs {
        for &x in &xs {
            let u = x as f32 / (cols - 1) as f32;
            let v = z as f32 / (rows - 1) as f32;
            let position = [min.x + u * size.x, grid.sample_clamped(x, z), min.y + v * size.y];
            mesh.push_vertex(position, grid.sample_normal(x, z).to_array(), [u, 1.0 - v]);
        }
    }
    let row_len = xs.len() as u32;
    let idx = |k: usize, m: usize| base + m as u32 * row_len + k as u32;
    let (nx, nz) = (xs.len() - 1, zs.len() - 1);
    for m in 0..nz {
        for k in 0..nx {
            mesh.push_quad([idx(k, m), idx(k + 1, m), idx(k + 1, m + 1), idx(k, m + 1)], is_odd_cell(k, m));
        }
    }

    let (lo, hi) = grid.height_range();
    let depth = (hi - lo).max(grid.cell_size());
    let south: Vec<u32> = (0..=nx).map(|k| idx(k, 0)).collect();
    let east: Vec<u32> = (0..=nz).map(|m| idx(nx, m)).collect();
    let north: Vec<u32> = (0..=nx).rev().map(|k| idx(k, nz)).collect();
    let west: Vec<u32> = (0..=nz).rev().map(|m| idx(0, m)).collect();
    for edge in [south, east, north, west] {
        mesh.push_skirt(&edge, depth);
    }
}
