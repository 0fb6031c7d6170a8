use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::GridError;

/// Platform classification used to pick the memory-pressure signal.
///
/// Parsed from configuration; an unknown platform string is rejected when the
/// config is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Pressure comes from the host's low-memory flag.
    Desktop,
    /// Pressure is a resident texture count reaching a fixed ceiling.
    Mobile,
}

/// Texture residency policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TexturePolicy {
    /// Load every cell texture during construction and never evict.
    pub load_whole_map: bool,
    /// Minimum delay between two incremental loads, in milliseconds.
    pub min_load_interval_ms: u64,
    pub platform: Platform,
    /// Resident texture ceiling on mobile.
    pub mobile_max_loaded_textures: usize,
    /// Cells finalized per tick in stage 2 when the whole map is loaded eagerly.
    pub whole_map_finalize_chunk: usize,
}

impl TexturePolicy {
    pub fn min_load_interval(&self) -> Duration {
        Duration::from_millis(self.min_load_interval_ms)
    }
}

impl Default for TexturePolicy {
    fn default() -> Self {
        Self {
            load_whole_map: false,
            min_load_interval_ms: 15,
            platform: Platform::Desktop,
            mobile_max_loaded_textures: 200,
            whole_map_finalize_chunk: 25,
        }
    }
}

/// Grid configuration: worker pool bound, construction batching, cell geometry
/// and texture policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Maximum degree of parallelism for stage 1 and bulk scans.
    pub max_threads: usize,
    /// Cells taken per stage 1 batch.
    pub batch_size: usize,
    /// Neighbour radius (in cells) precomputed for every cell.
    pub neighbor_radius: u32,
    /// Factor applied to the largest sprite footprint to get the cell size.
    pub cell_scale: f32,
    pub textures: TexturePolicy,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            max_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            batch_size: 40,
            neighbor_radius: 1,
            cell_scale: 1.3,
            textures: TexturePolicy::default(),
        }
    }
}

impl GridConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, GridError> {
        let config: GridConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GridError> {
        if self.max_threads == 0 {
            return Err(GridError::InvalidConfig("max_threads must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(GridError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.textures.whole_map_finalize_chunk == 0 {
            return Err(GridError::InvalidConfig(
                "whole_map_finalize_chunk must be at least 1".into(),
            ));
        }
        if !(self.cell_scale.is_finite() && self.cell_scale > 0.0) {
            return Err(GridError::InvalidConfig("cell_scale must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_config_defaults() {
        let config = GridConfig::default();
        assert!(config.max_threads >= 1);
        assert_eq!(config.batch_size, 40);
        assert_eq!(config.neighbor_radius, 1);
        assert_eq!(config.textures.min_load_interval(), Duration::from_millis(15));
        assert_eq!(config.textures.whole_map_finalize_chunk, 25);
        assert_eq!(config.textures.platform, Platform::Desktop);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config =
            GridConfig::from_json(r#"{ "max_threads": 2, "textures": { "platform": "mobile" } }"#)
                .unwrap();
        assert_eq!(config.max_threads, 2);
        assert_eq!(config.batch_size, 40);
        assert_eq!(config.textures.platform, Platform::Mobile);
        assert_eq!(config.textures.min_load_interval_ms, 15);
    }

    #[test]
    fn unknown_platform_is_rejected() {
        let err = GridConfig::from_json(r#"{ "textures": { "platform": "console" } }"#);
        assert!(matches!(err, Err(GridError::Config(_))));
    }

    #[test]
    fn zero_threads_is_rejected() {
        let err = GridConfig::from_json(r#"{ "max_threads": 0 }"#);
        assert!(matches!(err, Err(GridError::InvalidConfig(_))));
    }
}
