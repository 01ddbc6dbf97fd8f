//! # Butterfly-tiles Library
//!
//! A* routing over a road graph that is too large to keep in memory. The
//! graph is split into 0.1° tiles that are fetched on demand, cached with a
//! priority-aware eviction policy and spilled to disk when popular.
//!
//! ## Features
//!
//! - **On-demand tiles**: the search suspends to fetch missing tiles
//! - **Priority cache**: start/goal tiles are pinned, corridor tiles favoured
//! - **Disk spill**: popular evicted tiles survive restarts
//! - **Adaptive detail**: long or struggling searches request coarser tiles
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use butterfly_tiles::{route_points, LatLng, MemoryTileSource, RouteRequest, RouterConfig, RoutingContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = Arc::new(MemoryTileSource::from_path("graph.json").await?);
//!     let mut ctx = RoutingContext::new(source, RouterConfig::default());
//!
//!     let request = RouteRequest {
//!         points: vec![LatLng::new(50.85, 4.35), LatLng::new(50.88, 4.70)],
//!         distance_metric: Some("haversine".to_string()),
//!     };
//!     let response = route_points(&mut ctx, &request).await?;
//!     println!("{} points", response.path.len());
//!     Ok(())
//! }
//! ```

// Internal modules
mod core;

pub use crate::core::astar::{
    a_star_with_on_demand_tiles, check_interval_for_distance, find_path, max_iterations_for_distance,
    weight_for_distance, SearchOptions, SearchOutcome, SearchReport,
};
pub use crate::core::cache::{CacheConfig, CacheManager, CacheStats, EvictionReport, EvictionWeights, Priority};
pub use crate::core::config::RouterConfig;
pub use crate::core::context::{ContextStats, RoutingContext};
pub use crate::core::corridor::{buffer_for_distance, corridor_tiles, estimate_tile_count, PreloadProgress, PreloadReport};
pub use crate::core::diagnostics::{check_connectivity, find_all_components, ConnectivityReport};
pub use crate::core::disk::{DiskCache, DiskCacheConfig, DiskCacheStats, DiskEntryMeta, DiskEvictionResult};
pub use crate::core::error::{suggest_correction, Error, Result};
pub use crate::core::geo::{euclidean_distance, haversine_distance, DistanceMetric};
pub use crate::core::loader::{boundary_neighbors, BatchLoad, LoadOutcome, LoaderConfig, LoaderStats, TileLoader};
pub use crate::core::mode::{mode_for_distance, FetchMode, ModeController, ModeThresholds, SearchSignals};
pub use crate::core::multi_stop::{find_multi_stop_path, LegSummary, MultiStopRoute};
pub use crate::core::request::{route_points, LatLng, RouteRequest, RouteResponse};
pub use crate::core::source::{GraphEdge, GraphFile, HttpTileSource, MemoryTileSource, SourceConfig, TileSource};
pub use crate::core::store::TileStore;
pub use crate::core::tile::{Neighbor, Node, NodeId, Tile, TileKey, TILE_SIZE};

/// Library version
pub const VERSION: &str = env!("BUTTERFLY_VERSION");
