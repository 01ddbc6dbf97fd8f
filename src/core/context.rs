//! Routing context
//!
//! Owns the tile store, cache manager, disk spill cache and loader. Searches
//! borrow the context mutably, so only one search can touch the shared state
//! at a time.

use std::sync::Arc;

use log::{debug, warn};

use crate::core::cache::{CacheManager, CacheStats, EvictionReport, Priority};
use crate::core::config::RouterConfig;
use crate::core::disk::{DiskCache, DiskCacheStats, DiskEvictionResult};
use crate::core::error::Result;
use crate::core::loader::{LoadOutcome, LoaderStats, TileLoader};
use crate::core::mode::FetchMode;
use crate::core::source::TileSource;
use crate::core::store::TileStore;
use crate::core::tile::TileKey;

/// Snapshot of cache and loader state
#[derive(Debug, Clone, Default)]
pub struct ContextStats {
    pub resident_tiles: usize,
    pub resident_nodes: usize,
    pub estimated_bytes: usize,
    pub cache: CacheStats,
    pub loader: LoaderStats,
    pub disk: Option<DiskCacheStats>,
}

pub struct RoutingContext {
    pub(crate) store: TileStore,
    pub(crate) cache: CacheManager,
    pub(crate) disk: Option<DiskCache>,
    pub(crate) loader: TileLoader,
    pub(crate) config: RouterConfig,
}

impl RoutingContext {
    /// Context without a disk spill cache, whatever `config.disk` says
    pub fn new(source: Arc<dyn TileSource>, config: RouterConfig) -> Self {
        Self {
            store: TileStore::new(),
            cache: CacheManager::new(config.cache.clone()),
            disk: None,
            loader: TileLoader::new(source, config.loader.clone()),
            config,
        }
    }

    /// Context with the disk spill cache from `config.disk`, if configured
    pub async fn open(source: Arc<dyn TileSource>, config: RouterConfig) -> Result<Self> {
        let disk = match &config.disk {
            Some(disk_config) => Some(DiskCache::open(&disk_config.dir).await?),
            None => None,
        };
        let mut ctx = Self::new(source, config);
        ctx.disk = disk;
        Ok(ctx)
    }

    pub fn with_disk_cache(mut self, disk: DiskCache) -> Self {
        self.disk = Some(disk);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn store(&self) -> &TileStore {
        &self.store
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut CacheManager {
        &mut self.cache
    }

    pub fn disk(&self) -> Option<&DiskCache> {
        self.disk.as_ref()
    }

    pub fn disk_mut(&mut self) -> Option<&mut DiskCache> {
        self.disk.as_mut()
    }

    pub fn loader_stats(&self) -> &LoaderStats {
        self.loader.stats()
    }

    /// Ensure a tile is resident and record the access
    pub async fn ensure_loaded(&mut self, key: TileKey, mode: FetchMode) -> Result<LoadOutcome> {
        let outcome = self
            .loader
            .ensure_loaded(key, mode, &mut self.store, self.disk.as_mut())
            .await?;
        self.cache.touch(key, Priority::Normal);
        Ok(outcome)
    }

    /// Ensure the tile under a coordinate is resident, plus boundary neighbors
    pub async fn ensure_loaded_for_coord(&mut self, lat: f64, lon: f64, mode: FetchMode) -> Result<Vec<TileKey>> {
        let neighbors = self
            .loader
            .ensure_loaded_for_coord(lat, lon, mode, &mut self.store, self.disk.as_mut())
            .await?;
        self.cache.touch(TileKey::for_coord(lat, lon), Priority::Normal);
        Ok(neighbors)
    }

    /// Run the cache manager's eviction, then keep the disk cache under its limit
    pub async fn evict_if_needed(&mut self) -> EvictionReport {
        let report = self.cache.evict_if_needed(&mut self.store, self.disk.as_mut()).await;
        if report.spilled > 0 {
            if let Err(e) = self.enforce_disk_limit().await {
                warn!("Disk cache eviction failed: {e}");
            }
        }
        report
    }

    /// LFU-evict the disk cache down to the configured size limit
    pub async fn enforce_disk_limit(&mut self) -> Result<Option<DiskEvictionResult>> {
        let Some(max_size_mb) = self.config.disk.as_ref().map(|d| d.max_size_mb) else {
            return Ok(None);
        };
        match self.disk.as_mut() {
            Some(disk) => {
                let result = disk.evict_lfu(max_size_mb).await?;
                debug!("Disk cache at {} bytes", result.size_after);
                Ok(Some(result))
            }
            None => Ok(None),
        }
    }

    pub fn cache_stats(&self) -> ContextStats {
        ContextStats {
            resident_tiles: self.store.len(),
            resident_nodes: self.store.node_count(),
            estimated_bytes: self.store.estimated_bytes(),
            cache: self.cache.stats().clone(),
            loader: self.loader.stats().clone(),
            disk: self.disk.as_ref().map(DiskCache::stats),
        }
    }
}
