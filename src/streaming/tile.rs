//! Tile identity, placement and on-disk loading

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

use crate::core::error::Error;
use crate::core::types::{DVec2, Result, Vec2, Vec3};
use crate::heightfield::{Extents, GridTransform, HeightFieldGrid, LinearUnits};
use super::lod::{level_size, source_level};
use super::manifest::TileManifest;

/// Tile address in the tile grid; row 0 is the southern row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    pub col: u32,
    pub row: u32,
}

impl TileId {
    pub fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }

    /// `<base>/tile.<col>-<row>.pgm`
    pub fn elevation_path(&self, base: &Path) -> PathBuf {
        base.join(format!("tile.{}-{}.pgm", self.col, self.row))
    }

    /// `<base>/tile.<col>-<row>.ppm`
    pub fn image_path(&self, base: &Path) -> PathBuf {
        base.join(format!("tile.{}-{}.ppm", self.col, self.row))
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.col, self.row)
    }
}

/// Where each tile sits in world space.
///
/// The transform treats tile corners as grid samples, so one grid cell is
/// exactly one tile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileLayout {
    pub columns: u32,
    pub rows: u32,
    transform: GridTransform,
}

impl TileLayout {
    pub fn new(columns: u32, rows: u32, extents: Extents, units: LinearUnits) -> Result<Self> {
        let transform = GridTransform::new(units, extents, columns as usize + 1, rows as usize + 1)?;
        Ok(Self { columns, rows, transform })
    }

    pub fn tile_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    pub fn contains(&self, id: TileId) -> bool {
        id.col < self.columns && id.row < self.rows
    }

    /// Row-major index of a tile
    pub fn index(&self, id: TileId) -> usize {
        id.row as usize * self.columns as usize + id.col as usize
    }

    pub fn id_at(&self, index: usize) -> TileId {
        let columns = self.columns.max(1) as usize;
        TileId::new((index % columns) as u32, (index / columns) as u32)
    }

    pub fn extents(&self) -> Extents {
        self.transform.extents
    }

    pub fn units(&self) -> LinearUnits {
        self.transform.units
    }

    /// Earth rectangle covered by one tile
    pub fn tile_extents(&self, id: TileId) -> Extents {
        let e = self.transform.extents;
        let w = e.width() / self.columns as f64;
        let h = e.height() / self.rows as f64;
        Extents::new(
            e.left + w * id.col as f64,
            e.left + w * (id.col + 1) as f64,
            e.bottom + h * id.row as f64,
            e.bottom + h * (id.row + 1) as f64,
        )
    }

    pub fn world_size(&self) -> Vec2 {
        self.transform.world_size()
    }

    /// World size of one tile along (x, z)
    pub fn tile_world_size(&self) -> Vec2 {
        self.transform.spacing
    }

    /// World (x, z) rectangle of a tile as (min, max)
    pub fn tile_world_bounds(&self, id: TileId) -> (Vec2, Vec2) {
        let min = self.transform.grid_to_world(id.col as f32, id.row as f32, 0.0);
        let max = self.transform.grid_to_world((id.col + 1) as f32, (id.row + 1) as f32, 0.0);
        (Vec2::new(min.x, min.z), Vec2::new(max.x, max.z))
    }

    /// Tile covering a world (x, z); points on the far edges belong to the last tile
    pub fn tile_at_world(&self, xz: Vec2) -> Option<TileId> {
        let g = self.transform.world_to_grid(xz.x, xz.y);
        if !(g.x >= 0.0 && g.y >= 0.0 && g.x <= self.columns as f32 && g.y <= self.rows as f32) {
            return None;
        }
        let col = (g.x as u32).min(self.columns - 1);
        let row = (g.y as u32).min(self.rows - 1);
        Some(TileId::new(col, row))
    }

    pub fn world_to_earth(&self, xz: Vec2) -> DVec2 {
        self.transform.world_to_earth(xz)
    }

    pub fn earth_to_world(&self, earth: DVec2) -> Vec2 {
        self.transform.earth_to_world(earth)
    }

    /// Horizontal distance from a world point to a tile's rectangle (0 inside)
    pub fn horizontal_distance(&self, id: TileId, point: Vec3) -> f32 {
        let (min, max) = self.tile_world_bounds(id);
        let p = Vec2::new(point.x, point.z);
        (min - p).max(p - max).max(Vec2::ZERO).length()
    }
}

/// Paging state of a tile
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TileState {
    #[default]
    Unloaded,
    /// Requested; nothing renderable yet
    LoadPending,
    /// Data committed and renderable
    Resident,
    /// Marked for removal at the end of the frame
    Evicting,
}

/// Decoded rasters of one tile at one pyramid level.
///
/// Cloning shares the underlying buffers.
#[derive(Clone, Debug)]
pub struct TileData {
    pub id: TileId,
    pub level: u32,
    /// Full-resolution elevation over the tile's own extents
    pub grid: Arc<HeightFieldGrid>,
    /// Image at `level`
    pub image: Arc<RgbImage>,
    /// Size of the image raster on disk
    pub source_size: (u32, u32),
}

impl TileData {
    /// Same tile at a coarser level, downsampled in memory
    pub fn coarsened(&self, level: u32, base_texture_size: u32) -> TileData {
        let (w, h) = level_size(self.source_size, base_texture_size, level);
        let image = if (w, h) == self.image.dimensions() {
            Arc::clone(&self.image)
        } else {
            Arc::new(image::imageops::resize(&*self.image, w, h, FilterType::Triangle))
        };
        TileData { level, image, ..self.clone() }
    }
}

/// A tile as tracked by the cache
#[derive(Clone, Debug)]
pub struct Tile {
    pub id: TileId,
    pub state: TileState,
    pub data: Option<TileData>,
    /// Level of the outstanding load, if any
    pub requested_level: Option<u32>,
    /// Inside the frustum this frame
    pub visible: bool,
    /// Frame the tile was last drawn in
    pub last_drawn: u64,
}

impl Tile {
    /// New tile waiting for its first load
    pub fn pending(id: TileId, level: u32) -> Self {
        Self {
            id,
            state: TileState::LoadPending,
            data: None,
            requested_level: Some(level),
            visible: false,
            last_drawn: 0,
        }
    }

    /// Level of the committed data
    pub fn level(&self) -> Option<u32> {
        self.data.as_ref().map(|d| d.level)
    }

    pub fn is_renderable(&self) -> bool {
        matches!(self.state, TileState::Resident) && self.data.is_some()
    }

    /// Swap in freshly loaded data
    pub fn commit(&mut self, data: TileData) {
        self.data = Some(data);
        self.state = TileState::Resident;
        self.requested_level = None;
    }
}

/// Reads tiles of one tile set from disk
#[derive(Clone, Debug)]
pub struct TileStore {
    base_dir: PathBuf,
    manifest: TileManifest,
    layout: TileLayout,
}

impl TileStore {
    pub fn new(base_dir: impl Into<PathBuf>, manifest: TileManifest) -> Result<Self> {
        let layout = manifest.layout()?;
        Ok(Self { base_dir: base_dir.into(), manifest, layout })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn manifest(&self) -> &TileManifest {
        &self.manifest
    }

    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    /// Decode one tile at `level`.
    ///
    /// Any failure is reported as `MissingTileData` for that tile.
    pub fn load(&self, id: TileId, level: u32, base_texture_size: u32) -> Result<TileData> {
        let missing = |reason: String| Error::MissingTileData { col: id.col, row: id.row, reason };
        if !self.layout.contains(id) {
            return Err(missing("outside the tile grid".into()));
        }

        // Elevation: image row 0 is the northern edge, grid row 0 the southern
        let elevation_path = id.elevation_path(&self.base_dir);
        let raster = image::open(&elevation_path)
            .map_err(|e| missing(format!("{}: {}", elevation_path.display(), e)))?;
        let (cols, rows) = (raster.width() as usize, raster.height() as usize);
        let raw: Vec<f32> = match raster {
            DynamicImage::ImageLuma8(img) => img.into_raw().into_iter().map(f32::from).collect(),
            DynamicImage::ImageLuma16(img) => img.into_raw().into_iter().map(f32::from).collect(),
            other => other.to_luma16().into_raw().into_iter().map(f32::from).collect(),
        };
        let mut heights = Vec::with_capacity(cols * rows);
        for row in 0..rows {
            let y = rows - 1 - row;
            heights.extend(raw[y * cols..(y + 1) * cols].iter().map(|&v| self.manifest.elevation(v)));
        }
        let lo = heights.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = heights.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let grid = HeightFieldGrid::new(self.layout.units(), self.layout.tile_extents(id), lo, hi, cols, rows)
            .and_then(|g| g.with_samples(heights))
            .map_err(|e| missing(e.to_string()))?;

        let image_path = id.image_path(&self.base_dir);
        let source = image::open(&image_path)
            .map_err(|e| missing(format!("{}: {}", image_path.display(), e)))?
            .to_rgb8();
        let source_size = source.dimensions();
        let below_zero = source_level(source_size.0.max(source_size.1), base_texture_size);
        if below_zero < 0 {
            log::debug!("Tile {} image sits at level {}; clamping to level 0", id, below_zero);
        }
        let (w, h) = level_size(source_size, base_texture_size, level);
        let image = if (w, h) == source_size {
            source
        } else {
            image::imageops::resize(&source, w, h, FilterType::Triangle)
        };

        Ok(TileData { id, level, grid: Arc::new(grid), image: Arc::new(image), source_size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgb};

    fn layout() -> TileLayout {
        TileLayout::new(4, 2, Extents::new(1000.0, 1400.0, 0.0, 200.0), LinearUnits::Meters).unwrap()
    }

    #[test]
    fn test_layout_geometry() {
        let l = layout();
        assert_eq!(l.tile_count(), 8);
        assert_eq!(l.tile_world_size(), Vec2::new(100.0, 100.0));
        assert_eq!(l.tile_extents(TileId::new(1, 1)), Extents::new(1100.0, 1200.0, 100.0, 200.0));
        assert_eq!(l.tile_world_bounds(TileId::new(3, 0)), (Vec2::new(300.0, 0.0), Vec2::new(400.0, 100.0)));
        assert_eq!(l.id_at(l.index(TileId::new(2, 1))), TileId::new(2, 1));
    }

    #[test]
    fn test_tile_at_world() {
        let l = layout();
        assert_eq!(l.tile_at_world(Vec2::new(150.0, 50.0)), Some(TileId::new(1, 0)));
        assert_eq!(l.tile_at_world(Vec2::new(400.0, 200.0)), Some(TileId::new(3, 1)));
        assert_eq!(l.tile_at_world(Vec2::new(-0.1, 50.0)), None);
        assert_eq!(l.tile_at_world(Vec2::new(10.0, 200.5)), None);
    }

    #[test]
    fn test_horizontal_distance() {
        let l = layout();
        let id = TileId::new(1, 0);
        assert_eq!(l.horizontal_distance(id, Vec3::new(150.0, 999.0, 50.0)), 0.0);
        assert_eq!(l.horizontal_distance(id, Vec3::new(230.0, 0.0, 50.0)), 30.0);
        assert_eq!(l.horizontal_distance(id, Vec3::new(230.0, 0.0, 140.0)), 50.0);
    }

    #[test]
    fn test_tile_store_decodes_and_flips_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = TileManifest::new(4, 2, 8, Extents::new(1000.0, 1400.0, 0.0, 200.0), "LOCAL_CS[\"m\"]");
        manifest.height_scale = 0.5;
        manifest.height_offset = 10.0;
        let id = TileId::new(0, 1);

        // 3x2 raster: top (north) row 100s, bottom (south) row 0s
        let elevation: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(3, 2, |_, y| Luma([if y == 0 { 100 } else { 0 }]));
        elevation.save(id.elevation_path(dir.path())).unwrap();
        let image: RgbImage = ImageBuffer::from_pixel(32, 16, Rgb([10, 20, 30]));
        image.save(id.image_path(dir.path())).unwrap();

        let store = TileStore::new(dir.path(), manifest).unwrap();
        let data = store.load(id, 0, 16).unwrap();
        assert_eq!((data.grid.cols(), data.grid.rows()), (3, 2));
        assert_eq!(data.grid.get_elevation(0, 0, true), Some(10.0));
        assert_eq!(data.grid.get_elevation(2, 1, true), Some(60.0));
        assert_eq!(data.grid.extents(), Extents::new(1000.0, 1100.0, 100.0, 200.0));
        assert_eq!(data.source_size, (32, 16));
        assert_eq!(data.image.dimensions(), (16, 16));

        let coarse = data.coarsened(2, 16);
        assert_eq!(coarse.level, 2);
        assert_eq!(coarse.image.dimensions(), (4, 4));
        assert!(Arc::ptr_eq(&coarse.grid, &data.grid));
    }

    #[test]
    fn test_missing_files_are_local_errors() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = TileManifest::new(1, 1, 8, Extents::new(0.0, 1.0, 0.0, 1.0), "");
        let store = TileStore::new(dir.path(), manifest).unwrap();
        let err = store.load(TileId::new(0, 0), 0, 8).unwrap_err();
        assert!(matches!(err, Error::MissingTileData { col: 0, row: 0, .. }));
        let err = store.load(TileId::new(5, 0), 0, 8).unwrap_err();
        assert!(matches!(err, Error::MissingTileData { col: 5, .. }));
    }
}
