//! Elevation sources a grid can be built from

use super::extents::{Extents, LinearUnits};

/// External provider of elevation samples.
///
/// Implementations are sampled once when a [`HeightFieldGrid`](super::HeightFieldGrid)
/// is built; nothing keeps a reference to the source afterwards.
pub trait ElevationSource {
    fn extents(&self) -> Extents;

    fn units(&self) -> LinearUnits {
        LinearUnits::Meters
    }

    /// Sample counts as (cols, rows)
    fn dimensions(&self) -> (usize, usize);

    /// Declared (min, max) elevation
    fn height_range(&self) -> (f32, f32);

    /// Elevation of sample (col, row); row 0 is the southern edge
    fn elevation(&self, col: usize, row: usize) -> f32;
}

/// In-memory row-major samples
#[derive(Clone, Debug)]
pub struct GridSource {
    pub extents: Extents,
    pub units: LinearUnits,
    pub cols: usize,
    pub rows: usize,
    pub heights: Vec<f32>,
}

impl GridSource {
    pub fn new(extents: Extents, cols: usize, rows: usize, heights: Vec<f32>) -> Self {
        Self { extents, units: LinearUnits::Meters, cols, rows, heights }
    }
}

impl ElevationSource for GridSource {
    fn extents(&self) -> Extents {
        self.extents
    }

    fn units(&self) -> LinearUnits {
        self.units
    }

    fn dimensions(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    fn height_range(&self) -> (f32, f32) {
        let lo = self.heights.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = self.heights.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if lo > hi { (0.0, 0.0) } else { (lo, hi) }
    }

    fn elevation(&self, col: usize, row: usize) -> f32 {
        self.heights.get(row * self.cols + col).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::HeightFieldGrid;

    #[test]
    fn test_grid_from_source() {
        let source = GridSource::new(Extents::new(0.0, 20.0, 0.0, 10.0), 3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(source.height_range(), (1.0, 6.0));
        let grid = HeightFieldGrid::from_source(&source).unwrap();
        assert_eq!(grid.cols(), 3);
        assert_eq!(grid.rows(), 2);
        assert_eq!(grid.get_elevation(2, 1, true), Some(6.0));
        assert_eq!(grid.true_height_range(), (1.0, 6.0));
    }

    #[test]
    fn test_short_source_is_rejected() {
        let source = GridSource::new(Extents::new(0.0, 1.0, 0.0, 1.0), 1, 1, vec![0.0]);
        assert!(HeightFieldGrid::from_source(&source).is_err());
    }
}
