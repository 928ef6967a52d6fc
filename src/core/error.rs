//! Error types for the terrain engine

use thiserror::Error;

/// Main error type for the terrain engine
///
/// Per-query misses (a point outside the grid, a hole in the resident tile
/// set) are not errors; those APIs return `Option`.
#[derive(Debug, Error)]
pub enum Error {
    /// Grid or surface built over extents with no area.
    #[error("empty extents: {width} x {height}")]
    EmptyExtents { width: f64, height: f64 },

    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    /// Tile-set description missing or unparseable.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// One tile's rasters could not be read. Local to that tile.
    #[error("missing data for tile {col}-{row}: {reason}")]
    MissingTileData { col: u32, row: u32, reason: String },

    /// Surface strategy name not recognised.
    #[error("unknown surface strategy '{0}'")]
    UnknownStrategy(String),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("streaming error: {0}")]
    Streaming(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_tile() {
        let err = Error::MissingTileData { col: 3, row: 7, reason: "gone".into() };
        assert_eq!(err.to_string(), "missing data for tile 3-7: gone");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
