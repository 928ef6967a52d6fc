//! Runtime configuration bundle loaded from JSON

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::clod::SurfaceOptions;
use crate::core::types::Result;
use crate::streaming::PagingConfig;

/// All tunables of the CLOD engine and the tile pager.
///
/// Missing fields fall back to their defaults, so a partial file such as
/// `{"paging": {"expiration": 30}}` is valid.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    pub surface: SurfaceOptions,
    pub paging: PagingConfig,
}

impl TerrainConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from file (sync)
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Save to file (sync)
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = TerrainConfig::from_json_str(r#"{"paging": {"expiration": 30}}"#).unwrap();
        assert_eq!(config.paging.expiration, 30);
        assert_eq!(config.paging.update_budget, PagingConfig::default().update_budget);
        assert_eq!(config.surface, SurfaceOptions::default());
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let err = TerrainConfig::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("terrain.json");
        let mut config = TerrainConfig::default();
        config.surface.pixel_error = 2.5;
        config.paging.enabling_range = 800.0;
        config.save(&path).unwrap();
        assert_eq!(TerrainConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = TerrainConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
