//! Disk spill cache
//!
//! Durable second tier behind the in-memory tile store. Each tile is one JSON
//! file under the cache directory; `metadata.json` summarizes every entry so
//! LFU eviction never has to scan the directory.
//!
//! This is the only state that survives a process restart.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::tile::{Tile, TileKey};

const METADATA_FILE: &str = "metadata.json";

/// Target fraction of the size limit after LFU eviction
const EVICTION_TARGET_RATIO: f64 = 0.8;

/// Configuration for the disk spill cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskCacheConfig {
    pub dir: PathBuf,
    pub max_size_mb: u64,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".butterfly-tiles/cache"),
            max_size_mb: 500,
        }
    }
}

/// Per-entry bookkeeping kept in the metadata index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskEntryMeta {
    pub access_count: u64,
    /// Unix epoch milliseconds
    pub last_accessed: i64,
    /// Serialized record size in bytes
    pub size: u64,
    /// Unix epoch milliseconds
    pub cached_at: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataIndex {
    tiles: BTreeMap<String, DiskEntryMeta>,
    total_size: u64,
}

/// On-disk tile file: the tile plus its access bookkeeping
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiskRecord {
    #[serde(flatten)]
    tile: Tile,
    access_count: u64,
    last_accessed: i64,
    size: u64,
    cached_at: i64,
}

/// Result of an LFU eviction run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskEvictionResult {
    pub entries_deleted: usize,
    pub bytes_freed: u64,
    pub size_before: u64,
    pub size_after: u64,
}

/// Summary of the cache contents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskCacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Durable key -> tile store
#[derive(Debug)]
pub struct DiskCache {
    dir: PathBuf,
    index: MetadataIndex,
}

impl DiskCache {
    /// Open (or create) a cache directory and load its metadata index
    ///
    /// An unreadable index is discarded and rebuilt from subsequent writes.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let index_path = dir.join(METADATA_FILE);
        let index = match tokio::fs::read(&index_path).await {
            Ok(bytes) => match serde_json::from_slice::<MetadataIndex>(&bytes) {
                Ok(index) => index,
                Err(e) => {
                    warn!("Discarding unreadable disk cache index {}: {e}", index_path.display());
                    MetadataIndex::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MetadataIndex::default(),
            Err(e) => return Err(Error::IoError(e)),
        };

        info!(
            "Opened disk cache at {} ({} entries, {} bytes)",
            dir.display(),
            index.tiles.len(),
            index.total_size
        );

        Ok(Self { dir, index })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn tile_path(&self, key: &TileKey) -> PathBuf {
        self.dir.join(format!("tile_{}.json", key.file_stem()))
    }

    async fn persist_index(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.index)?;
        tokio::fs::write(self.dir.join(METADATA_FILE), bytes).await?;
        Ok(())
    }

    fn forget(&mut self, key: &str) -> Option<DiskEntryMeta> {
        let meta = self.index.tiles.remove(key)?;
        self.index.total_size = self.index.total_size.saturating_sub(meta.size);
        Some(meta)
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.index.tiles.contains_key(&key.to_string())
    }

    pub fn entry(&self, key: &TileKey) -> Option<&DiskEntryMeta> {
        self.index.tiles.get(&key.to_string())
    }

    pub fn stats(&self) -> DiskCacheStats {
        DiskCacheStats {
            entries: self.index.tiles.len(),
            total_bytes: self.index.total_size,
        }
    }

    /// Write a tile and record it in the index
    pub async fn save(&mut self, key: &TileKey, tile: &Tile) -> Result<()> {
        self.save_with_access_count(key, tile, 0).await
    }

    /// Write a tile carrying over the access count it earned in memory
    ///
    /// The stored count never drops below what the index already holds.
    pub async fn save_with_access_count(&mut self, key: &TileKey, tile: &Tile, access_count: u64) -> Result<()> {
        let name = key.to_string();
        let now = now_millis();
        let previous = self.forget(&name);
        let access_count = previous.as_ref().map_or(access_count, |m| m.access_count.max(access_count));
        let cached_at = previous.as_ref().map_or(now, |m| m.cached_at);

        let mut record = DiskRecord {
            tile: tile.clone(),
            access_count,
            last_accessed: now,
            size: 0,
            cached_at,
        };
        // The size field counts its own digits
        let mut bytes = serde_json::to_vec(&record)?;
        while record.size != bytes.len() as u64 {
            record.size = bytes.len() as u64;
            bytes = serde_json::to_vec(&record)?;
        }
        let size = record.size;

        tokio::fs::write(self.tile_path(key), &bytes).await?;

        self.index.total_size += size;
        self.index.tiles.insert(
            name,
            DiskEntryMeta {
                access_count,
                last_accessed: now,
                size,
                cached_at,
            },
        );
        self.persist_index().await?;

        debug!("Spilled tile {key} to disk ({size} bytes, {access_count} accesses)");
        Ok(())
    }

    /// Read a tile back, or `None` on a miss
    ///
    /// A file that fails to deserialize is deleted and reported as a miss.
    pub async fn load(&mut self, key: &TileKey) -> Result<Option<Tile>> {
        let name = key.to_string();
        let path = self.tile_path(key);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.forget(&name).is_some() {
                    self.persist_index().await?;
                }
                return Ok(None);
            }
            Err(e) => return Err(Error::IoError(e)),
        };

        let record = match serde_json::from_slice::<DiskRecord>(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!("Corrupted disk cache entry for tile {key}, removing: {e}");
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove corrupted entry {}: {e}", path.display());
                }
                self.forget(&name);
                self.persist_index().await?;
                return Ok(None);
            }
        };

        let now = now_millis();
        let size = bytes.len() as u64;
        let entry = self.index.tiles.entry(name).or_insert_with(|| DiskEntryMeta {
            access_count: record.access_count,
            last_accessed: now,
            size: 0,
            cached_at: record.cached_at,
        });
        entry.access_count += 1;
        entry.last_accessed = now;
        if entry.size != size {
            self.index.total_size = self.index.total_size.saturating_sub(entry.size) + size;
            entry.size = size;
        }
        self.persist_index().await?;

        Ok(Some(record.tile))
    }

    /// Remove least-frequently-used entries until the cache fits in 80% of the limit
    ///
    /// Ties on access count go to the entry accessed longest ago.
    pub async fn evict_lfu(&mut self, max_size_mb: u64) -> Result<DiskEvictionResult> {
        let limit = max_size_mb * 1024 * 1024;
        let size_before = self.index.total_size;
        let mut result = DiskEvictionResult {
            size_before,
            size_after: size_before,
            ..Default::default()
        };

        if size_before <= limit {
            return Ok(result);
        }

        let target = (limit as f64 * EVICTION_TARGET_RATIO) as u64;
        let mut candidates: Vec<(String, u64, i64)> = self
            .index
            .tiles
            .iter()
            .map(|(key, meta)| (key.clone(), meta.access_count, meta.last_accessed))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));

        for (name, _, _) in candidates {
            if self.index.total_size <= target {
                break;
            }
            let key: TileKey = name.parse()?;
            match tokio::fs::remove_file(self.tile_path(&key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to evict disk entry {name}: {e}");
                    continue;
                }
            }
            if let Some(meta) = self.forget(&name) {
                result.entries_deleted += 1;
                result.bytes_freed += meta.size;
            }
        }

        self.persist_index().await?;
        result.size_after = self.index.total_size;

        info!(
            "Disk cache LFU eviction: {} entries deleted, {} -> {} bytes",
            result.entries_deleted, result.size_before, result.size_after
        );
        Ok(result)
    }

    /// Delete every entry
    pub async fn clear(&mut self) -> Result<()> {
        let names: Vec<String> = self.index.tiles.keys().cloned().collect();
        for name in names {
            let key: TileKey = name.parse()?;
            match tokio::fs::remove_file(self.tile_path(&key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::IoError(e)),
            }
            self.forget(&name);
        }
        self.persist_index().await
    }
}
