//! Router configuration
//!
//! Every section is optional in the JSON file; missing fields take defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::cache::CacheConfig;
use crate::core::disk::DiskCacheConfig;
use crate::core::error::{Error, Result};
use crate::core::loader::LoaderConfig;
use crate::core::mode::ModeThresholds;
use crate::core::source::SourceConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub cache: CacheConfig,
    /// Disk spill cache; disabled when absent
    pub disk: Option<DiskCacheConfig>,
    pub source: SourceConfig,
    pub loader: LoaderConfig,
    pub mode: ModeThresholds,
}

impl RouterConfig {
    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: RouterConfig = serde_json::from_str(&text)
            .map_err(|e| Error::SerializationError(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the cache and loader cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_tiles == 0 {
            return Err(Error::InvalidInput("cache.max_tiles must be at least 1".to_string()));
        }
        let ratio = self.cache.eviction_target_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(Error::InvalidInput(format!(
                "cache.eviction_target_ratio must be in (0, 1], got {ratio}"
            )));
        }
        let margin = self.loader.boundary_margin;
        if !(0.0..0.5).contains(&margin) {
            return Err(Error::InvalidInput(format!(
                "loader.boundary_margin must be in [0, 0.5), got {margin}"
            )));
        }
        if self.loader.preload_batch_size == 0 {
            return Err(Error::InvalidInput("loader.preload_batch_size must be at least 1".to_string()));
        }
        Ok(())
    }
}
