//! Corridor preloader
//!
//! Before a long search starts, the tiles along the straight line between
//! start and goal are loaded in concurrent batches so the search suspends
//! less often. Corridor tiles get a bonus in the eviction score.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info};

use crate::core::cache::Priority;
use crate::core::context::RoutingContext;
use crate::core::geo::haversine_distance;
use crate::core::mode::FetchMode;
use crate::core::tile::TileKey;

/// Progress callback: `(tiles_done, tiles_total)`
pub type PreloadProgress = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Outcome of a corridor preload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreloadReport {
    /// Corridor tiles considered
    pub requested: usize,
    /// Tiles brought in from disk or the source
    pub loaded: usize,
    pub already_resident: usize,
    pub failed: usize,
    /// Corridor tiles left out because the cache could not hold them
    pub skipped: usize,
}

/// Buffer width in tiles for a straight-line distance in meters
pub fn buffer_for_distance(distance_m: f64) -> i32 {
    let km = distance_m / 1000.0;
    if km < 100.0 {
        1
    } else if km < 200.0 {
        2
    } else {
        3
    }
}

/// Tiles in the bounding rectangle of start and goal, expanded by `buffer` tiles
pub fn estimate_tile_count(start_lat: f64, start_lon: f64, goal_lat: f64, goal_lon: f64, buffer: i32) -> usize {
    let start = TileKey::for_coord(start_lat, start_lon);
    let goal = TileKey::for_coord(goal_lat, goal_lon);
    let buffer = buffer.max(0) as usize;
    let rows = start.lat_index.abs_diff(goal.lat_index) as usize + 1 + 2 * buffer;
    let cols = start.lon_index.abs_diff(goal.lon_index) as usize + 1 + 2 * buffer;
    rows * cols
}

/// Tiles crossed by the straight start-goal line, widened by `buffer` tiles
///
/// Ordered from the start outwards so early batches cover the search front.
pub fn corridor_tiles(start_lat: f64, start_lon: f64, goal_lat: f64, goal_lon: f64, buffer: i32) -> Vec<TileKey> {
    let start = TileKey::for_coord(start_lat, start_lon);
    let goal = TileKey::for_coord(goal_lat, goal_lon);
    let span = start
        .lat_index
        .abs_diff(goal.lat_index)
        .max(start.lon_index.abs_diff(goal.lon_index)) as usize;
    // Two samples per tile step so diagonal crossings are not skipped
    let samples = span * 2 + 1;
    let buffer = buffer.max(0);

    let mut seen = HashSet::new();
    let mut tiles = Vec::new();
    for i in 0..=samples {
        let t = i as f64 / samples as f64;
        let lat = start_lat + (goal_lat - start_lat) * t;
        let lon = start_lon + (goal_lon - start_lon) * t;
        let center = TileKey::for_coord(lat, lon);

        for d_lat in -buffer..=buffer {
            for d_lon in -buffer..=buffer {
                let key = center.offset(d_lat, d_lon);
                if seen.insert(key) {
                    tiles.push(key);
                }
            }
        }
    }
    tiles
}

impl RoutingContext {
    /// Whether a route between two coordinates spans enough tiles to preload
    ///
    /// Counts the bare start-goal rectangle; the buffer only widens the
    /// corridor once preloading is decided.
    pub fn should_preload(&self, start_lat: f64, start_lon: f64, goal_lat: f64, goal_lon: f64) -> bool {
        estimate_tile_count(start_lat, start_lon, goal_lat, goal_lon, 0) > self.config.loader.corridor_min_tiles
    }

    /// Corridor buffer for the straight-line distance between two coordinates
    pub fn corridor_buffer(&self, start_lat: f64, start_lon: f64, goal_lat: f64, goal_lon: f64) -> i32 {
        buffer_for_distance(haversine_distance(start_lat, start_lon, goal_lat, goal_lon))
    }

    /// Load the corridor between two coordinates in sequential batches
    ///
    /// The corridor replaces the cache manager's previous corridor set. It is
    /// truncated to what the cache can hold after eviction so preloading
    /// never evicts its own tiles. Failed tiles are counted, never fatal.
    pub async fn preload_corridor(
        &mut self,
        start: (f64, f64),
        goal: (f64, f64),
        buffer: i32,
        mode: FetchMode,
        batch_size: usize,
        on_progress: Option<PreloadProgress>,
    ) -> PreloadReport {
        let mut tiles = corridor_tiles(start.0, start.1, goal.0, goal.1, buffer);
        let capacity = (self.config.cache.max_tiles as f64 * self.config.cache.eviction_target_ratio) as usize;

        let mut report = PreloadReport {
            requested: tiles.len(),
            ..Default::default()
        };
        if tiles.len() > capacity {
            report.skipped = tiles.len() - capacity;
            info!(
                "Corridor has {} tiles, preloading the {} closest to the start",
                tiles.len(),
                capacity
            );
            tiles.truncate(capacity);
        }

        self.cache.mark_corridor_tiles(tiles.iter().copied());

        let total = tiles.len();
        let mut done = 0;
        for chunk in tiles.chunks(batch_size.max(1)) {
            let resident = chunk.iter().filter(|key| self.store.contains(key)).count();
            let batch = self
                .loader
                .load_batch(chunk, mode, &mut self.store, self.disk.as_mut())
                .await;

            report.already_resident += resident;
            report.loaded += batch.loaded.len();
            report.failed += batch.failed.len();
            for key in chunk {
                if self.store.contains(key) {
                    self.cache.touch(*key, Priority::Corridor);
                }
            }
            self.evict_if_needed().await;

            done += chunk.len();
            if let Some(callback) = &on_progress {
                callback(done, total);
            }
            debug!("Corridor preload: {done}/{total} tiles");
        }

        info!(
            "Corridor preload finished: {} loaded, {} resident, {} failed, {} skipped",
            report.loaded, report.already_resident, report.failed, report.skipped
        );
        report
    }
}
