//! Tile-set manifest: a plain `Key=Value` text file
//!
//! ```text
//! Columns=4
//! Rows=3
//! LOD0_Size=512
//! Extent_Left=500000
//! Extent_Right=540000
//! Extent_Bottom=4100000
//! Extent_Top=4130000
//! CRS=PROJCS["WGS 84 / UTM zone 10N", ...]
//! ```
//!
//! `Height_Scale` and `Height_Offset` are optional and map raw elevation
//! raster values to metres (`offset + scale * raw`).

use std::fmt::Write as _;
use std::path::Path;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::heightfield::{Extents, LinearUnits};
use super::tile::{TileId, TileLayout};

/// Manifest file name inside a tile-set directory
pub const MANIFEST_FILE: &str = "tileset.txt";

#[derive(Clone, Debug, PartialEq)]
pub struct TileManifest {
    pub columns: u32,
    pub rows: u32,
    /// Image raster size treated as the base level by the producer
    pub lod0_size: u32,
    pub extents: Extents,
    /// Coordinate system as WKT
    pub crs: String,
    pub height_scale: f32,
    pub height_offset: f32,
}

impl TileManifest {
    pub fn new(columns: u32, rows: u32, lod0_size: u32, extents: Extents, crs: impl Into<String>) -> Self {
        Self {
            columns,
            rows,
            lod0_size,
            extents,
            crs: crs.into(),
            height_scale: 1.0,
            height_offset: 0.0,
        }
    }

    /// Parse manifest text.
    ///
    /// Blank lines and `#` comments are skipped. Unknown keys are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let mut columns = None;
        let mut rows = None;
        let mut lod0_size = None;
        let mut extent = [None; 4];
        let mut crs = None;
        let mut height_scale = 1.0;
        let mut height_offset = 0.0;

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::Manifest(format!("line {}: expected Key=Value", number + 1)));
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "Columns" => columns = Some(parse_value::<u32>(key, value)?),
                "Rows" => rows = Some(parse_value::<u32>(key, value)?),
                "LOD0_Size" => lod0_size = Some(parse_value::<u32>(key, value)?),
                "Extent_Left" => extent[0] = Some(parse_value::<f64>(key, value)?),
                "Extent_Right" => extent[1] = Some(parse_value::<f64>(key, value)?),
                "Extent_Bottom" => extent[2] = Some(parse_value::<f64>(key, value)?),
                "Extent_Top" => extent[3] = Some(parse_value::<f64>(key, value)?),
                "CRS" => crs = Some(value.to_string()),
                "Height_Scale" => height_scale = parse_value::<f32>(key, value)?,
                "Height_Offset" => height_offset = parse_value::<f32>(key, value)?,
                other => log::debug!("Ignoring unknown manifest key '{}'", other),
            }
        }

        let columns = required(columns, "Columns")?;
        let rows = required(rows, "Rows")?;
        if columns == 0 || rows == 0 {
            return Err(Error::Manifest(format!("empty tile grid {}x{}", columns, rows)));
        }
        let extents = Extents::new(
            required(extent[0], "Extent_Left")?,
            required(extent[1], "Extent_Right")?,
            required(extent[2], "Extent_Bottom")?,
            required(extent[3], "Extent_Top")?,
        );
        Ok(Self {
            columns,
            rows,
            lod0_size: required(lod0_size, "LOD0_Size")?,
            extents,
            crs: required(crs, "CRS")?,
            height_scale,
            height_offset,
        })
    }

    /// Load from file (sync); a missing file is a manifest error
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Manifest(format!("{}: {}", path.display(), e)))?;
        let manifest = Self::parse(&text)?;
        log::info!(
            "Loaded tile manifest {}: {}x{} tiles, LOD0 {} px",
            path.display(), manifest.columns, manifest.rows, manifest.lod0_size
        );
        Ok(manifest)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail
        let _ = writeln!(out, "Columns={}", self.columns);
        let _ = writeln!(out, "Rows={}", self.rows);
        let _ = writeln!(out, "LOD0_Size={}", self.lod0_size);
        let _ = writeln!(out, "Extent_Left={}", self.extents.left);
        let _ = writeln!(out, "Extent_Right={}", self.extents.right);
        let _ = writeln!(out, "Extent_Bottom={}", self.extents.bottom);
        let _ = writeln!(out, "Extent_Top={}", self.extents.top);
        let _ = writeln!(out, "CRS={}", self.crs);
        let _ = writeln!(out, "Height_Scale={}", self.height_scale);
        let _ = writeln!(out, "Height_Offset={}", self.height_offset);
        out
    }

    /// Save to file (sync)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_text())?;
        Ok(())
    }

    /// Horizontal units inferred from the CRS
    pub fn units(&self) -> LinearUnits {
        LinearUnits::from_wkt(&self.crs)
    }

    /// Every tile identity, row by row
    pub fn tile_ids(&self) -> impl Iterator<Item = TileId> + '_ {
        (0..self.rows).flat_map(move |row| (0..self.columns).map(move |col| TileId::new(col, row)))
    }

    /// Placement of the tiles in world space; fails for empty extents
    pub fn layout(&self) -> Result<TileLayout> {
        TileLayout::new(self.columns, self.rows, self.extents, self.units())
    }

    /// Metres for a raw elevation raster value
    #[inline]
    pub fn elevation(&self, raw: f32) -> f32 {
        self.height_offset + self.height_scale * raw
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Manifest(format!("{}: cannot parse '{}'", key, value)))
}

fn required<T>(value: Option<T>, key: &str) -> Result<T> {
    value.ok_or_else(|| Error::Manifest(format!("missing {}", key)))
}
