//! Earth extents, linear units and the world <-> grid transform

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::{DVec2, Mat4, Result, Vec2, Vec3};

/// Smallest extent width/height accepted as non-degenerate
pub const EXTENT_EPSILON: f64 = 1e-9;

/// Metres per degree of latitude (and of longitude at the equator)
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Rectangle in earth (projected or geographic) coordinates
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Extents {
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
    pub top: f64,
}

impl Extents {
    pub fn new(left: f64, right: f64, bottom: f64, top: f64) -> Self {
        Self { left, right, bottom, top }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn center(&self) -> DVec2 {
        DVec2::new((self.left + self.right) * 0.5, (self.bottom + self.top) * 0.5)
    }

    /// True when either side is below [`EXTENT_EPSILON`]
    pub fn is_empty(&self) -> bool {
        !(self.width() > EXTENT_EPSILON && self.height() > EXTENT_EPSILON)
    }

    /// Fail with `EmptyExtents` for degenerate rectangles
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::EmptyExtents { width: self.width(), height: self.height() });
        }
        Ok(())
    }

    pub fn contains(&self, p: DVec2) -> bool {
        p.x >= self.left && p.x <= self.right && p.y >= self.bottom && p.y <= self.top
    }
}

/// Horizontal unit of the earth coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearUnits {
    #[default]
    Meters,
    InternationalFeet,
    UsSurveyFeet,
    Degrees,
}

impl LinearUnits {
    /// Metres per unit along (east, north) around the given centre latitude
    pub fn meters_per_unit(self, center_latitude: f64) -> DVec2 {
        match self {
            LinearUnits::Meters => DVec2::ONE,
            LinearUnits::InternationalFeet => DVec2::splat(0.3048),
            LinearUnits::UsSurveyFeet => DVec2::splat(1200.0 / 3937.0),
            LinearUnits::Degrees => DVec2::new(
                METERS_PER_DEGREE * center_latitude.to_radians().cos(),
                METERS_PER_DEGREE,
            ),
        }
    }

    /// Infer the units from a WKT coordinate system description
    pub fn from_wkt(wkt: &str) -> Self {
        let lower = wkt.to_ascii_lowercase();
        let projected = lower.trim_start().starts_with("projcs") || lower.trim_start().starts_with("projcrs");
        if !projected && (lower.contains("geogcs") || lower.contains("degree")) {
            LinearUnits::Degrees
        } else if lower.contains("us survey foot") || lower.contains("foot_us") {
            LinearUnits::UsSurveyFeet
        } else if lower.contains("foot") || lower.contains("feet") {
            LinearUnits::InternationalFeet
        } else {
            LinearUnits::Meters
        }
    }
}

/// Fixed mapping between earth coordinates, world space and grid indices.
///
/// World space is Y-up: earth east maps to +X and earth north to +Z, with the
/// extents' lower-left corner at the world origin. Grid sample (0, 0) sits at
/// that corner; samples are spaced `spacing` world units apart.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridTransform {
    pub units: LinearUnits,
    pub extents: Extents,
    /// World units per earth unit along (x, z)
    pub scale: DVec2,
    /// World distance between adjacent samples along (x, z)
    pub spacing: Vec2,
}

impl GridTransform {
    pub fn new(units: LinearUnits, extents: Extents, cols: usize, rows: usize) -> Result<Self> {
        extents.validate()?;
        if cols < 2 || rows < 2 {
            return Err(Error::InvalidGrid(format!("grid must be at least 2x2, got {}x{}", cols, rows)));
        }
        let scale = units.meters_per_unit(extents.center().y);
        let spacing = Vec2::new(
            (extents.width() * scale.x / (cols - 1) as f64) as f32,
            (extents.height() * scale.y / (rows - 1) as f64) as f32,
        );
        Ok(Self { units, extents, scale, spacing })
    }

    /// World size of the covered rectangle along (x, z)
    pub fn world_size(&self) -> Vec2 {
        Vec2::new(
            (self.extents.width() * self.scale.x) as f32,
            (self.extents.height() * self.scale.y) as f32,
        )
    }

    /// Fractional grid indices (col, row) for a world (x, z)
    pub fn world_to_grid(&self, x: f32, z: f32) -> Vec2 {
        Vec2::new(x / self.spacing.x, z / self.spacing.y)
    }

    /// World position of a (possibly fractional) grid index with the given height
    pub fn grid_to_world(&self, col: f32, row: f32, height: f32) -> Vec3 {
        Vec3::new(col * self.spacing.x, height, row * self.spacing.y)
    }

    /// World (x, z) of an earth coordinate
    pub fn earth_to_world(&self, earth: DVec2) -> Vec2 {
        Vec2::new(
            ((earth.x - self.extents.left) * self.scale.x) as f32,
            ((earth.y - self.extents.bottom) * self.scale.y) as f32,
        )
    }

    /// Earth coordinate of a world (x, z)
    pub fn world_to_earth(&self, world: Vec2) -> DVec2 {
        DVec2::new(
            self.extents.left + world.x as f64 / self.scale.x,
            self.extents.bottom + world.y as f64 / self.scale.y,
        )
    }

    /// Matrix from grid-index object space (x = col, y = height, z = row) to world
    pub fn object_to_world(&self) -> Mat4 {
        Mat4::from_scale(Vec3::new(self.spacing.x, 1.0, self.spacing.y))
    }
}
