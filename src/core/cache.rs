//! LRU-with-priority cache manager
//!
//! Keeps access metadata for tiles and decides which resident tiles to evict
//! when the store grows past its tile-count or memory ceiling. Metadata is
//! kept after eviction so a re-loaded tile resumes its history.
//!
//! Scoring is `access_count * access_weight - age_secs * age_weight`, plus
//! `corridor_bonus` for corridor members; the lowest scores go first. Tiles
//! whose access count reaches `relevance_threshold` are spilled to disk
//! before being dropped.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::core::disk::DiskCache;
use crate::core::store::TileStore;
use crate::core::tile::TileKey;

/// Eviction protection level of a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Priority {
    #[default]
    Normal = 0,
    /// Member of the active search corridor
    Corridor = 1,
    /// Start/goal tile of the active search; never evicted
    Critical = 2,
}

/// Weights of the eviction score
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionWeights {
    pub access: f64,
    pub age: f64,
    pub corridor_bonus: f64,
}

impl Default for EvictionWeights {
    fn default() -> Self {
        Self {
            access: 1000.0,
            age: 1.0,
            corridor_bonus: 10_000.0,
        }
    }
}

/// Cache ceilings and policy knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_tiles: usize,
    pub max_memory_bytes: usize,
    /// Minimum access count for a tile to be spilled to disk on eviction
    pub relevance_threshold: u32,
    /// Fraction of the ceilings an eviction run reduces the store to
    pub eviction_target_ratio: f64,
    pub weights: EvictionWeights,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_tiles: 500,
            max_memory_bytes: 50 * 1024 * 1024,
            relevance_threshold: 2,
            eviction_target_ratio: 0.8,
            weights: EvictionWeights::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct TileMetadata {
    last_accessed: Instant,
    access_count: u32,
    priority: Priority,
}

/// Outcome of one `evict_if_needed` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvictionReport {
    pub evicted: Vec<TileKey>,
    pub spilled: usize,
    pub spill_failures: usize,
    pub tiles_before: usize,
    pub tiles_after: usize,
}

impl EvictionReport {
    pub fn is_noop(&self) -> bool {
        self.evicted.is_empty()
    }
}

/// Running counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub touches: u64,
    pub eviction_runs: u64,
    pub tiles_evicted: u64,
    pub tiles_spilled: u64,
}

/// Access bookkeeping and eviction policy over the tile store
#[derive(Debug, Default)]
pub struct CacheManager {
    config: CacheConfig,
    metadata: HashMap<TileKey, TileMetadata>,
    corridor: HashSet<TileKey>,
    stats: CacheStats,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn priority(&self, key: &TileKey) -> Priority {
        self.metadata
            .get(key)
            .map(|m| m.priority)
            .unwrap_or_default()
    }

    pub fn access_count(&self, key: &TileKey) -> u32 {
        self.metadata.get(key).map_or(0, |m| m.access_count)
    }

    pub fn is_corridor_member(&self, key: &TileKey) -> bool {
        self.corridor.contains(key)
    }

    /// Record an access; priority can only be raised here
    pub fn touch(&mut self, key: TileKey, priority: Priority) {
        let meta = self.metadata.entry(key).or_insert_with(|| TileMetadata {
            last_accessed: Instant::now(),
            access_count: 0,
            priority: Priority::Normal,
        });
        meta.access_count = meta.access_count.saturating_add(1);
        meta.last_accessed = Instant::now();
        meta.priority = meta.priority.max(priority);
        self.stats.touches += 1;
    }

    /// Explicitly set a tile's priority, lowering it if needed
    pub fn restore_priority(&mut self, key: TileKey, priority: Priority) {
        if let Some(meta) = self.metadata.get_mut(&key) {
            meta.priority = priority;
        }
    }

    /// Drop a tile's critical pin, falling back to corridor or normal priority
    pub fn release_critical(&mut self, key: TileKey) {
        if self.priority(&key) == Priority::Critical {
            let fallback = if self.corridor.contains(&key) {
                Priority::Corridor
            } else {
                Priority::Normal
            };
            self.restore_priority(key, fallback);
        }
    }

    /// Replace the corridor set
    ///
    /// Members of the previous corridor lose their corridor priority; new
    /// members are raised to at least `Corridor`.
    pub fn mark_corridor_tiles<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = TileKey>,
    {
        let next: HashSet<TileKey> = keys.into_iter().collect();

        for key in self.corridor.difference(&next) {
            if let Some(meta) = self.metadata.get_mut(key) {
                if meta.priority == Priority::Corridor {
                    meta.priority = Priority::Normal;
                }
            }
        }

        for key in &next {
            let meta = self.metadata.entry(*key).or_insert_with(|| TileMetadata {
                last_accessed: Instant::now(),
                access_count: 0,
                priority: Priority::Normal,
            });
            meta.priority = meta.priority.max(Priority::Corridor);
        }

        debug!("Corridor set to {} tiles", next.len());
        self.corridor = next;
    }

    /// Eviction score of a tile; lower scores are evicted first
    pub fn score(&self, key: &TileKey, now: Instant) -> f64 {
        let w = &self.config.weights;
        let (count, age_secs) = match self.metadata.get(key) {
            Some(meta) => (
                meta.access_count as f64,
                now.saturating_duration_since(meta.last_accessed).as_secs_f64(),
            ),
            None => (0.0, 0.0),
        };
        let bonus = if self.corridor.contains(key) {
            w.corridor_bonus
        } else {
            0.0
        };
        count * w.access - age_secs * w.age + bonus
    }

    fn over_ceiling(&self, store: &TileStore) -> bool {
        store.len() > self.config.max_tiles || store.estimated_bytes() > self.config.max_memory_bytes
    }

    /// Evict low-scoring tiles when the store exceeds a ceiling
    ///
    /// A no-op while both tile count and memory are within limits. Otherwise
    /// evicts until both are at `eviction_target_ratio` of their ceiling or
    /// only critical tiles remain. Relevant tiles are written to `disk`
    /// before removal; spill failures are logged and the tile is dropped anyway.
    pub async fn evict_if_needed(
        &mut self,
        store: &mut TileStore,
        mut disk: Option<&mut DiskCache>,
    ) -> EvictionReport {
        let tiles_before = store.len();
        let mut report = EvictionReport {
            tiles_before,
            tiles_after: tiles_before,
            ..Default::default()
        };

        if !self.over_ceiling(store) {
            return report;
        }

        let ratio = self.config.eviction_target_ratio;
        let target_tiles = (self.config.max_tiles as f64 * ratio).floor() as usize;
        let target_bytes = (self.config.max_memory_bytes as f64 * ratio).floor() as usize;

        let now = Instant::now();
        let mut candidates: Vec<(TileKey, f64)> = store
            .keys()
            .filter(|key| self.priority(key) < Priority::Critical)
            .map(|key| (*key, self.score(key, now)))
            .collect();
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        for (key, _) in candidates {
            if store.len() <= target_tiles && store.estimated_bytes() <= target_bytes {
                break;
            }

            if self.access_count(&key) >= self.config.relevance_threshold {
                if let (Some(disk), Some(tile)) = (disk.as_deref_mut(), store.get(&key)) {
                    let accesses = u64::from(self.access_count(&key));
                    match disk.save_with_access_count(&key, tile, accesses).await {
                        Ok(()) => report.spilled += 1,
                        Err(e) => {
                            warn!("Failed to spill tile {key} to disk: {e}");
                            report.spill_failures += 1;
                        }
                    }
                }
            }

            store.remove(&key);
            report.evicted.push(key);
        }

        report.tiles_after = store.len();
        self.stats.eviction_runs += 1;
        self.stats.tiles_evicted += report.evicted.len() as u64;
        self.stats.tiles_spilled += report.spilled as u64;

        if report.tiles_after > target_tiles {
            warn!(
                "Cache ceiling not reached: {} tiles remain after eviction (target {}), remaining tiles are critical",
                report.tiles_after, target_tiles
            );
        }

        info!(
            "Evicted {} tiles ({} spilled to disk), {} -> {} resident",
            report.evicted.len(),
            report.spilled,
            report.tiles_before,
            report.tiles_after
        );
        report
    }
}
