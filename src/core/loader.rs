//! On-demand tile loader
//!
//! Makes sure a tile is resident before the search reads it: resident tiles
//! return immediately, then the disk spill cache is tried, then the tile
//! source. Near a tile edge the adjacent tiles are loaded too.

use std::sync::Arc;

use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::core::disk::DiskCache;
use crate::core::error::{Error, Result};
use crate::core::mode::FetchMode;
use crate::core::source::TileSource;
use crate::core::store::TileStore;
use crate::core::tile::{TileKey, TILE_SIZE};

/// Loader and preloader tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Fraction of the tile width from an edge that triggers neighbor loading
    pub boundary_margin: f64,
    /// Corridor preloading kicks in above this many estimated tiles
    pub corridor_min_tiles: usize,
    /// Tiles fetched concurrently per preload batch
    pub preload_batch_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            boundary_margin: 0.08,
            corridor_min_tiles: 3,
            preload_batch_size: (num_cpus::get() * 2).clamp(4, 32),
        }
    }
}

/// Where an `ensure_loaded` call found its tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Resident,
    Disk,
    Network,
}

/// Counters of load outcomes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoaderStats {
    pub resident_hits: u64,
    pub disk_hits: u64,
    pub network_fetches: u64,
    pub failures: u64,
}

impl LoaderStats {
    /// Tiles that had to be brought in from disk or network
    pub fn tiles_loaded(&self) -> u64 {
        self.disk_hits + self.network_fetches
    }
}

/// Result of a concurrent batch load
#[derive(Debug, Default)]
pub struct BatchLoad {
    pub loaded: Vec<TileKey>,
    pub failed: Vec<(TileKey, Error)>,
}

/// Tile keys adjacent to a coordinate's tile in the directions where the
/// coordinate lies within `margin` (fraction of tile width) of an edge
pub fn boundary_neighbors(lat: f64, lon: f64, margin: f64) -> Vec<TileKey> {
    let key = TileKey::for_coord(lat, lon);
    let lat_pos = lat / TILE_SIZE - key.lat_index as f64;
    let lon_pos = lon / TILE_SIZE - key.lon_index as f64;

    let direction = |pos: f64| -> i32 {
        if pos < margin {
            -1
        } else if pos > 1.0 - margin {
            1
        } else {
            0
        }
    };
    let d_lat = direction(lat_pos);
    let d_lon = direction(lon_pos);

    let mut keys = Vec::with_capacity(3);
    if d_lat != 0 {
        keys.push(key.offset(d_lat, 0));
    }
    if d_lon != 0 {
        keys.push(key.offset(0, d_lon));
    }
    if d_lat != 0 && d_lon != 0 {
        keys.push(key.offset(d_lat, d_lon));
    }
    keys
}

/// Brings tiles into the store from disk or the tile source
pub struct TileLoader {
    source: Arc<dyn TileSource>,
    config: LoaderConfig,
    stats: LoaderStats,
}

impl TileLoader {
    pub fn new(source: Arc<dyn TileSource>, config: LoaderConfig) -> Self {
        Self {
            source,
            config,
            stats: LoaderStats::default(),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn stats(&self) -> &LoaderStats {
        &self.stats
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Try the disk spill cache; read failures are logged and count as a miss
    async fn hydrate_from_disk(
        &mut self,
        key: TileKey,
        store: &mut TileStore,
        disk: Option<&mut DiskCache>,
    ) -> bool {
        let Some(disk) = disk else {
            return false;
        };
        match disk.load(&key).await {
            Ok(Some(tile)) => {
                store.insert(tile);
                self.stats.disk_hits += 1;
                debug!("Tile {key} hydrated from disk cache");
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Disk cache read for tile {key} failed: {e}");
                false
            }
        }
    }

    /// Ensure one tile is resident
    ///
    /// Fails with `FetchError` only when the tile is neither resident, on
    /// disk, nor obtainable from the source.
    pub async fn ensure_loaded(
        &mut self,
        key: TileKey,
        mode: FetchMode,
        store: &mut TileStore,
        disk: Option<&mut DiskCache>,
    ) -> Result<LoadOutcome> {
        if store.contains(&key) {
            self.stats.resident_hits += 1;
            return Ok(LoadOutcome::Resident);
        }

        if self.hydrate_from_disk(key, store, disk).await {
            return Ok(LoadOutcome::Disk);
        }

        match self.source.fetch(key, mode).await {
            Ok(tile) => {
                debug!(
                    "Fetched tile {key} from {} ({mode}, {} nodes)",
                    self.source.name(),
                    tile.nodes.len()
                );
                store.insert(tile);
                self.stats.network_fetches += 1;
                Ok(LoadOutcome::Network)
            }
            Err(e) => {
                self.stats.failures += 1;
                warn!("Failed to load tile {key}: {e}");
                Err(Error::FetchError {
                    tile: key,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Replace a resident tile with a fresh fetch at another detail level
    ///
    /// On failure the resident copy is kept.
    pub async fn refetch(&mut self, key: TileKey, mode: FetchMode, store: &mut TileStore) -> Result<()> {
        match self.source.fetch(key, mode).await {
            Ok(tile) => {
                store.insert(tile);
                self.stats.network_fetches += 1;
                debug!("Re-fetched tile {key} at {mode}");
                Ok(())
            }
            Err(e) => {
                self.stats.failures += 1;
                Err(Error::FetchError {
                    tile: key,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Load several tiles, fetching the ones missing from disk concurrently
    ///
    /// Every load settles; failures are collected rather than propagated.
    pub async fn load_batch(
        &mut self,
        keys: &[TileKey],
        mode: FetchMode,
        store: &mut TileStore,
        mut disk: Option<&mut DiskCache>,
    ) -> BatchLoad {
        let mut batch = BatchLoad::default();
        let mut to_fetch = Vec::new();

        for &key in keys {
            if store.contains(&key) {
                self.stats.resident_hits += 1;
            } else if self.hydrate_from_disk(key, store, disk.as_deref_mut()).await {
                batch.loaded.push(key);
            } else if !to_fetch.contains(&key) {
                to_fetch.push(key);
            }
        }

        if to_fetch.is_empty() {
            return batch;
        }

        let source = Arc::clone(&self.source);
        let fetches = to_fetch.iter().map(|&key| {
            let source = Arc::clone(&source);
            async move { (key, source.fetch(key, mode).await) }
        });

        for (key, result) in join_all(fetches).await {
            match result {
                Ok(tile) => {
                    store.insert(tile);
                    self.stats.network_fetches += 1;
                    batch.loaded.push(key);
                }
                Err(e) => {
                    self.stats.failures += 1;
                    warn!("Failed to load tile {key}: {e}");
                    batch.failed.push((
                        key,
                        Error::FetchError {
                            tile: key,
                            reason: e.to_string(),
                        },
                    ));
                }
            }
        }

        batch
    }

    /// Ensure the tile under a coordinate is resident, plus its neighbors
    /// when the coordinate is close to a tile edge
    ///
    /// Only the coordinate's own tile can fail the call. Returns the boundary
    /// neighbors that were requested.
    pub async fn ensure_loaded_for_coord(
        &mut self,
        lat: f64,
        lon: f64,
        mode: FetchMode,
        store: &mut TileStore,
        mut disk: Option<&mut DiskCache>,
    ) -> Result<Vec<TileKey>> {
        let key = TileKey::for_coord(lat, lon);
        self.ensure_loaded(key, mode, store, disk.as_deref_mut()).await?;

        let neighbors = boundary_neighbors(lat, lon, self.config.boundary_margin);
        if !neighbors.is_empty() {
            let batch = self.load_batch(&neighbors, mode, store, disk).await;
            if !batch.failed.is_empty() {
                info!(
                    "{} of {} boundary tiles near {key} failed to load, continuing",
                    batch.failed.len(),
                    neighbors.len()
                );
            }
        }
        Ok(neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::source::{GraphEdge, GraphFile, MemoryTileSource};
    use crate::core::tile::{Node, Tile};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tempfile::tempdir;

    struct FlakySource {
        inner: MemoryTileSource,
        broken: HashSet<TileKey>,
    }

    #[async_trait]
    impl TileSource for FlakySource {
        async fn fetch(&self, key: TileKey, mode: FetchMode) -> Result<Tile> {
            if self.broken.contains(&key) {
                return Err(Error::NetworkError("connection reset".to_string()));
            }
            self.inner.fetch(key, mode).await
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn grid_graph() -> GraphFile {
        let mut nodes = Vec::new();
        for lat in 0..3 {
            for lon in 0..3 {
                nodes.push(Node::new(
                    format!("n{lat}{lon}"),
                    lat as f64 * 0.1 + 0.05,
                    lon as f64 * 0.1 + 0.05,
                ));
            }
        }
        GraphFile {
            nodes,
            edges: vec![GraphEdge {
                from: "n00".to_string(),
                to: "n01".to_string(),
                weight: None,
            }],
            bidirectional: true,
        }
    }

    fn memory_loader() -> (TileLoader, Arc<MemoryTileSource>) {
        let source = Arc::new(MemoryTileSource::from_graph(grid_graph()).unwrap());
        let loader = TileLoader::new(source.clone(), LoaderConfig::default());
        (loader, source)
    }

    #[test]
    fn test_boundary_neighbors() {
        // Interior point
        assert!(boundary_neighbors(0.15, 0.15, 0.08).is_empty());
        // Close to the northern edge only
        assert_eq!(boundary_neighbors(0.195, 0.15, 0.08), vec![TileKey::new(2, 1)]);
        // Close to the south-west corner
        let corner = boundary_neighbors(0.101, 0.101, 0.08);
        assert_eq!(corner.len(), 3);
        assert!(corner.contains(&TileKey::new(0, 1)));
        assert!(corner.contains(&TileKey::new(1, 0)));
        assert!(corner.contains(&TileKey::new(0, 0)));
    }

    #[tokio::test]
    async fn test_ensure_loaded_is_idempotent() {
        let (mut loader, source) = memory_loader();
        let mut store = TileStore::new();
        let key = TileKey::new(0, 0);

        let first = loader.ensure_loaded(key, FetchMode::Detailed, &mut store, None).await.unwrap();
        let second = loader.ensure_loaded(key, FetchMode::Detailed, &mut store, None).await.unwrap();

        assert_eq!(first, LoadOutcome::Network);
        assert_eq!(second, LoadOutcome::Resident);
        assert_eq!(source.fetch_count(), 1);
        assert!(store.contains_node("n00"));
    }

    #[tokio::test]
    async fn test_disk_hit_skips_source() {
        let dir = tempdir().unwrap();
        let mut disk = DiskCache::open(dir.path()).await.unwrap();
        let key = TileKey::new(1, 1);
        let mut tile = Tile::empty(key);
        tile.nodes.push(Node::new("cached", 0.15, 0.15));
        disk.save(&key, &tile).await.unwrap();

        let (mut loader, source) = memory_loader();
        let mut store = TileStore::new();
        let outcome = loader
            .ensure_loaded(key, FetchMode::Detailed, &mut store, Some(&mut disk))
            .await
            .unwrap();

        assert_eq!(outcome, LoadOutcome::Disk);
        assert_eq!(source.fetch_count(), 0);
        assert!(store.contains_node("cached"));
        assert_eq!(disk.entry(&key).unwrap().access_count, 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_without_disk_copy() {
        let key = TileKey::new(0, 0);
        let source = FlakySource {
            inner: MemoryTileSource::from_graph(grid_graph()).unwrap(),
            broken: HashSet::from([key]),
        };
        let mut loader = TileLoader::new(Arc::new(source), LoaderConfig::default());
        let mut store = TileStore::new();

        let err = loader
            .ensure_loaded(key, FetchMode::Detailed, &mut store, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FetchError { tile, .. } if tile == key));
        assert_eq!(loader.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_boundary_load_tolerates_neighbor_failures() {
        let source = FlakySource {
            inner: MemoryTileSource::from_graph(grid_graph()).unwrap(),
            broken: HashSet::from([TileKey::new(1, 2)]),
        };
        let mut loader = TileLoader::new(Arc::new(source), LoaderConfig::default());
        let mut store = TileStore::new();

        // Near the north-east corner of tile (1,1)
        let requested = loader
            .ensure_loaded_for_coord(0.199, 0.199, FetchMode::Detailed, &mut store, None)
            .await
            .unwrap();

        assert_eq!(requested.len(), 3);
        assert!(store.contains(&TileKey::new(1, 1)));
        assert!(store.contains(&TileKey::new(2, 1)));
        assert!(store.contains(&TileKey::new(2, 2)));
        assert!(!store.contains(&TileKey::new(1, 2)));
    }

    #[tokio::test]
    async fn test_load_batch_dedupes_and_skips_resident() {
        let (mut loader, source) = memory_loader();
        let mut store = TileStore::new();
        loader
            .ensure_loaded(TileKey::new(0, 0), FetchMode::Detailed, &mut store, None)
            .await
            .unwrap();

        let keys = [TileKey::new(0, 0), TileKey::new(0, 1), TileKey::new(0, 1), TileKey::new(2, 2)];
        let batch = loader.load_batch(&keys, FetchMode::Detailed, &mut store, None).await;

        assert_eq!(batch.loaded.len(), 2);
        assert!(batch.failed.is_empty());
        assert_eq!(source.fetch_count(), 3);
        assert_eq!(loader.stats().tiles_loaded(), 3);
    }
}
