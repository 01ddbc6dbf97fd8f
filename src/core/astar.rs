//! Weighted A* over on-demand tiles
//!
//! The search suspends whenever a node's tile is missing and asks the loader
//! for it. Every check interval it runs cache eviction, logs progress and
//! lets the mode controller adjust the fetch-detail level.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};
use tokio_util::sync::CancellationToken;

use crate::core::cache::Priority;
use crate::core::context::RoutingContext;
use crate::core::error::{Error, Result};
use crate::core::geo::{haversine_distance, DistanceMetric};
use crate::core::mode::{FetchMode, ModeController, SearchSignals};
use crate::core::tile::{Node, NodeId, TileKey};

/// Iterations without getting closer to the goal that make one stalled check
const STALL_WINDOW: usize = 1_000;

/// Consecutive stalled checks that count as one stall event
const STALL_CHECKS_PER_EVENT: u32 = 3;

/// Heuristic inflation factor for a straight-line distance in meters
pub fn weight_for_distance(distance_m: f64) -> f64 {
    let km = distance_m / 1000.0;
    if km > 400.0 {
        4.0
    } else if km > 200.0 {
        3.0
    } else if km > 100.0 {
        2.0
    } else if km > 50.0 {
        1.5
    } else if km > 20.0 {
        1.3
    } else if km > 10.0 {
        1.1
    } else {
        1.0
    }
}

/// Hard iteration ceiling for a straight-line distance in meters
pub fn max_iterations_for_distance(distance_m: f64) -> usize {
    let km = distance_m / 1000.0;
    if km > 400.0 {
        10_000_000
    } else if km > 200.0 {
        5_000_000
    } else if km > 100.0 {
        2_000_000
    } else if km > 50.0 {
        1_000_000
    } else if km > 20.0 {
        500_000
    } else {
        100_000
    }
}

/// Iterations between periodic checks
pub fn check_interval_for_distance(distance_m: f64) -> usize {
    if distance_m > 100_000.0 {
        1_000
    } else {
        500
    }
}

/// Per-search options
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub metric: DistanceMetric,
    /// Force corridor preloading on or off; decided from the route length when `None`
    pub preload_corridor: Option<bool>,
    pub cancel: Option<CancellationToken>,
    /// Override the distance-derived iteration ceiling
    pub max_iterations: Option<usize>,
}

impl SearchOptions {
    pub fn with_metric(metric: DistanceMetric) -> Self {
        Self {
            metric,
            ..Default::default()
        }
    }
}

/// How a search ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Found,
    /// Open set exhausted
    NoPath,
    IterationLimit,
    Cancelled,
    /// Fewer than two ids were given; the input is returned unchanged
    TooFewNodes,
}

#[derive(Debug, Clone)]
pub struct SearchReport {
    pub outcome: SearchOutcome,
    /// Node ids from start to goal inclusive; empty unless found
    pub path: Vec<NodeId>,
    /// `(lat, lon)` of each node in `path`, captured while searching so
    /// tiles evicted mid-search do not leave gaps
    pub coordinates: Vec<(f64, f64)>,
    /// Sum of edge weights along `path`
    pub cost: f64,
    pub iterations: usize,
    pub explored: usize,
    pub tiles_loaded: u64,
    pub mode_switches: u32,
    pub final_mode: FetchMode,
    pub elapsed: Duration,
}

impl SearchReport {
    fn unchanged(ids: &[NodeId], coordinates: Vec<(f64, f64)>) -> Self {
        Self {
            outcome: SearchOutcome::TooFewNodes,
            path: ids.to_vec(),
            coordinates,
            cost: 0.0,
            iterations: 0,
            explored: 0,
            tiles_loaded: 0,
            mode_switches: 0,
            final_mode: FetchMode::Detailed,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_found(&self) -> bool {
        self.outcome == SearchOutcome::Found
    }
}

// Reverse ordering on f makes BinaryHeap a min-heap
#[derive(Debug, Clone)]
struct QueueEntry {
    f: f64,
    g: f64,
    node: NodeId,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| self.g.total_cmp(&other.g))
    }
}

/// Stall tracking between periodic checks
#[derive(Debug, Default)]
struct ProgressTracker {
    best_distance: f64,
    last_improvement: usize,
    stalled_checks: u32,
    stall_events: u32,
}

impl ProgressTracker {
    fn new(distance: f64) -> Self {
        Self {
            best_distance: distance,
            ..Default::default()
        }
    }

    fn observe(&mut self, distance: f64, iteration: usize) {
        if distance < self.best_distance {
            self.best_distance = distance;
            self.last_improvement = iteration;
        }
    }

    fn check(&mut self, iteration: usize) {
        if iteration - self.last_improvement >= STALL_WINDOW {
            self.stalled_checks += 1;
            if self.stalled_checks >= STALL_CHECKS_PER_EVENT {
                self.stall_events += 1;
                self.stalled_checks = 0;
            }
        } else {
            self.stalled_checks = 0;
        }
    }
}

fn reconstruct_path(came_from: &HashMap<NodeId, NodeId>, goal: &str) -> Vec<NodeId> {
    let mut path = vec![goal.to_string()];
    let mut current = goal;
    while let Some(prev) = came_from.get(current) {
        path.push(prev.clone());
        current = prev;
    }
    path.reverse();
    path
}

/// Find a path between the first and last id
///
/// Both ids must be in the node index of the resident tiles. Missing ids and
/// a start/goal tile that cannot be loaded are errors; no path, the iteration
/// ceiling and cancellation are reported through `SearchOutcome`.
pub async fn find_path(ctx: &mut RoutingContext, ids: &[NodeId], options: &SearchOptions) -> Result<SearchReport> {
    if ids.len() < 2 {
        warn!("Path search needs a start and a goal, got {} node(s)", ids.len());
        let coordinates = ids
            .iter()
            .filter_map(|id| ctx.store.node(id))
            .map(|n| (n.lat, n.lon))
            .collect();
        return Ok(SearchReport::unchanged(ids, coordinates));
    }
    let (start_id, goal_id) = (&ids[0], &ids[ids.len() - 1]);

    let start = ctx
        .store
        .node(start_id)
        .cloned()
        .ok_or_else(|| Error::NodeNotFound(start_id.clone()))?;
    let goal = ctx
        .store
        .node(goal_id)
        .cloned()
        .ok_or_else(|| Error::NodeNotFound(goal_id.clone()))?;

    let start_key = start.tile_key();
    let goal_key = goal.tile_key();
    ctx.cache.touch(start_key, Priority::Critical);
    ctx.cache.touch(goal_key, Priority::Critical);

    let result = run_search(ctx, &start, &goal, options).await;

    ctx.cache.release_critical(start_key);
    ctx.cache.release_critical(goal_key);
    result
}

/// Path between the first and last id, or an empty path on any failure
pub async fn a_star_with_on_demand_tiles(
    ctx: &mut RoutingContext,
    ids: &[NodeId],
    options: &SearchOptions,
) -> Vec<NodeId> {
    match find_path(ctx, ids, options).await {
        Ok(report) => report.path,
        Err(e) => {
            error!("Path search failed: {e}");
            Vec::new()
        }
    }
}

async fn run_search(
    ctx: &mut RoutingContext,
    start: &Node,
    goal: &Node,
    options: &SearchOptions,
) -> Result<SearchReport> {
    let started = Instant::now();
    let tiles_before = ctx.loader.stats().tiles_loaded();

    let distance = haversine_distance(start.lat, start.lon, goal.lat, goal.lon);
    let weight = weight_for_distance(distance);
    let max_iterations = options
        .max_iterations
        .unwrap_or_else(|| max_iterations_for_distance(distance));
    let check_interval = check_interval_for_distance(distance);
    let mut controller = ModeController::for_distance(distance, ctx.config.mode.clone());
    let mut mode = controller.mode();

    info!(
        "Searching {} -> {} ({:.1} km, weight {weight}, mode {mode}, metric {})",
        start.id,
        goal.id,
        distance / 1000.0,
        options.metric.name()
    );

    // Start and goal tiles (and their boundary neighbors) must be resident
    for node in [start, goal] {
        ctx.ensure_loaded_for_coord(node.lat, node.lon, mode).await?;
    }

    let preload = options
        .preload_corridor
        .unwrap_or_else(|| ctx.should_preload(start.lat, start.lon, goal.lat, goal.lon));
    if preload {
        let buffer = ctx.corridor_buffer(start.lat, start.lon, goal.lat, goal.lon);
        let batch_size = ctx.config.loader.preload_batch_size;
        ctx.preload_corridor((start.lat, start.lon), (goal.lat, goal.lon), buffer, mode, batch_size, None)
            .await;
    }

    let mut open = BinaryHeap::new();
    let mut g_score: HashMap<NodeId, f64> = HashMap::new();
    let mut came_from: HashMap<NodeId, NodeId> = HashMap::new();
    let mut closed: HashSet<NodeId> = HashSet::new();
    // Coordinates of queued nodes, kept so an evicted tile can be reloaded on pop
    let mut coords: HashMap<NodeId, (f64, f64)> = HashMap::new();

    coords.insert(start.id.clone(), (start.lat, start.lon));
    coords.insert(goal.id.clone(), (goal.lat, goal.lon));
    g_score.insert(start.id.clone(), 0.0);
    open.push(QueueEntry {
        f: weight * options.metric.distance(start, goal),
        g: 0.0,
        node: start.id.clone(),
    });

    let mut tracker = ProgressTracker::new(distance);
    let mut iterations = 0usize;
    let mut explored = 0usize;
    let mut outcome = SearchOutcome::NoPath;
    let mut path = Vec::new();
    let mut coordinates = Vec::new();
    let mut cost = 0.0;

    while let Some(current) = open.pop() {
        if options.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            info!("Search cancelled after {iterations} iterations");
            outcome = SearchOutcome::Cancelled;
            break;
        }

        iterations += 1;
        if iterations > max_iterations {
            warn!(
                "Iteration limit {max_iterations} reached after exploring {explored} nodes, giving up"
            );
            outcome = SearchOutcome::IterationLimit;
            break;
        }

        if current.node == goal.id {
            path = reconstruct_path(&came_from, &goal.id);
            coordinates = path.iter().filter_map(|id| coords.get(id).copied()).collect();
            cost = current.g;
            outcome = SearchOutcome::Found;
            break;
        }

        if !closed.insert(current.node.clone()) {
            continue;
        }

        let Some(&(lat, lon)) = coords.get(&current.node) else {
            continue;
        };
        let tile_key = TileKey::for_coord(lat, lon);
        if let Err(e) = ctx.ensure_loaded_for_coord(lat, lon, mode).await {
            // Region degrades to whatever is still resident
            debug!("Expanding {} without its tile: {e}", current.node);
        }
        ctx.cache.touch(tile_key, Priority::Normal);

        let edges: Vec<(NodeId, f64)> = ctx
            .store
            .neighbors(&current.node)
            .map(|nb| (nb.id.clone(), nb.weight))
            .collect();
        explored += 1;

        for (neighbor_id, edge_weight) in edges {
            if closed.contains(&neighbor_id) {
                continue;
            }
            let Some(neighbor) = ctx.store.node(&neighbor_id) else {
                trace!("Neighbor {neighbor_id} of {} is not resident, skipping", current.node);
                continue;
            };

            let tentative = current.g + edge_weight;
            if tentative < g_score.get(&neighbor_id).copied().unwrap_or(f64::INFINITY) {
                let h = options.metric.distance(neighbor, goal);
                coords.insert(neighbor_id.clone(), (neighbor.lat, neighbor.lon));
                came_from.insert(neighbor_id.clone(), current.node.clone());
                g_score.insert(neighbor_id.clone(), tentative);
                open.push(QueueEntry {
                    f: tentative + weight * h,
                    g: tentative,
                    node: neighbor_id,
                });
            }
        }

        tracker.observe(haversine_distance(lat, lon, goal.lat, goal.lon), iterations);

        if iterations % check_interval == 0 {
            tracker.check(iterations);
            ctx.evict_if_needed().await;

            let progress_pct = if distance > 0.0 {
                ((1.0 - tracker.best_distance / distance) * 100.0).clamp(0.0, 100.0)
            } else {
                100.0
            };
            info!(
                "Search progress: {iterations} iterations, {explored} explored, {} queued, {progress_pct:.1}% closer, {} tiles resident",
                open.len(),
                ctx.store.len()
            );

            let signals = SearchSignals {
                distance_to_goal_m: tracker.best_distance,
                stall_count: tracker.stall_events,
                progress_pct,
                tiles_loaded: ctx.store.len(),
                frontier_size: open.len(),
                iterations,
                explored_nodes: explored,
            };
            if let Some(next) = controller.maybe_switch(&signals) {
                mode = next;
                tracker.stall_events = 0;
                // Resident tiles keep the detail they were fetched with
                if let Err(e) = ctx.loader.refetch(tile_key, mode, &mut ctx.store).await {
                    warn!("Keeping tile {tile_key} at its previous detail: {e}");
                }
            }
        }
    }

    if outcome == SearchOutcome::NoPath {
        warn!(
            "No path from {} to {}: explored {} of {} resident nodes across {} tiles",
            start.id,
            goal.id,
            closed.len(),
            ctx.store.node_count(),
            ctx.store.len()
        );
    }

    let report = SearchReport {
        outcome,
        path,
        coordinates,
        cost,
        iterations,
        explored,
        tiles_loaded: ctx.loader.stats().tiles_loaded() - tiles_before,
        mode_switches: controller.switches(),
        final_mode: mode,
        elapsed: started.elapsed(),
    };
    debug!(
        "Search finished: {:?}, {} iterations, {} tiles loaded in {:?}",
        report.outcome, report.iterations, report.tiles_loaded, report.elapsed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::CacheConfig;
    use crate::core::config::RouterConfig;
    use crate::core::mode::ModeThresholds;
    use crate::core::source::{GraphEdge, GraphFile, MemoryTileSource};
    use std::sync::Arc;

    fn edge(from: &str, to: &str, weight: f64) -> GraphEdge {
        GraphEdge {
            from: from.to_string(),
            to: to.to_string(),
            weight: Some(weight),
        }
    }

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn context_for(graph: GraphFile) -> RoutingContext {
        let source = Arc::new(MemoryTileSource::from_graph(graph).unwrap());
        let mut ctx = RoutingContext::new(source, RouterConfig::default());
        ctx.ensure_loaded(TileKey::new(0, 0), FetchMode::Detailed).await.unwrap();
        ctx
    }

    /// `n` nodes eastward along lat 0.05, linked in both directions with weight 1
    fn chain(n: usize, lon0: f64, step: f64) -> GraphFile {
        GraphFile {
            nodes: (0..n)
                .map(|i| Node::new(format!("n{i}"), 0.05, lon0 + i as f64 * step))
                .collect(),
            edges: (1..n)
                .map(|i| edge(&format!("n{}", i - 1), &format!("n{i}"), 1.0))
                .collect(),
            bidirectional: true,
        }
    }

    fn diamond() -> GraphFile {
        // s -> a -> t is cheaper than s -> b -> t
        GraphFile {
            nodes: vec![
                Node::new("s", 0.05, 0.02),
                Node::new("a", 0.06, 0.05),
                Node::new("b", 0.04, 0.05),
                Node::new("t", 0.05, 0.08),
            ],
            edges: vec![edge("s", "a", 2.0), edge("a", "t", 2.0), edge("s", "b", 1.0), edge("b", "t", 5.0)],
            bidirectional: false,
        }
    }

    #[test]
    fn test_weight_for_distance() {
        assert_eq!(weight_for_distance(500_000.0), 4.0);
        assert_eq!(weight_for_distance(400_000.0), 3.0);
        assert_eq!(weight_for_distance(150_000.0), 2.0);
        assert_eq!(weight_for_distance(60_000.0), 1.5);
        assert_eq!(weight_for_distance(30_000.0), 1.3);
        assert_eq!(weight_for_distance(15_000.0), 1.1);
        assert_eq!(weight_for_distance(5_000.0), 1.0);
    }

    #[test]
    fn test_iteration_budget_scales() {
        assert_eq!(max_iterations_for_distance(1_000.0), 100_000);
        assert_eq!(max_iterations_for_distance(500_000.0), 10_000_000);
        assert_eq!(check_interval_for_distance(50_000.0), 500);
        assert_eq!(check_interval_for_distance(150_000.0), 1_000);
    }

    #[test]
    fn test_queue_is_min_heap() {
        let mut heap = BinaryHeap::new();
        for (f, node) in [(3.0, "c"), (1.0, "a"), (2.0, "b")] {
            heap.push(QueueEntry {
                f,
                g: 0.0,
                node: node.to_string(),
            });
        }
        assert_eq!(heap.pop().unwrap().node, "a");
        assert_eq!(heap.pop().unwrap().node, "b");
    }

    #[tokio::test]
    async fn test_finds_cheapest_path() {
        let mut ctx = context_for(diamond()).await;
        let report = find_path(&mut ctx, &ids(&["s", "t"]), &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(report.outcome, SearchOutcome::Found);
        assert_eq!(report.path, ids(&["s", "a", "t"]));
        assert_eq!(report.cost, 4.0);
        assert_eq!(report.final_mode, FetchMode::Detailed);
    }

    #[tokio::test]
    async fn test_critical_pins_are_released() {
        let mut ctx = context_for(diamond()).await;
        find_path(&mut ctx, &ids(&["s", "t"]), &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(ctx.cache().priority(&TileKey::new(0, 0)), Priority::Normal);
    }

    #[tokio::test]
    async fn test_no_path_is_not_an_error() {
        let mut ctx = context_for(diamond()).await;
        // Edges are one-way
        let report = find_path(&mut ctx, &ids(&["t", "s"]), &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(report.outcome, SearchOutcome::NoPath);
        assert!(report.path.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_node_is_fatal() {
        let mut ctx = context_for(diamond()).await;
        let err = find_path(&mut ctx, &ids(&["s", "nowhere"]), &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NodeNotFound(id) if id == "nowhere"));
        assert!(a_star_with_on_demand_tiles(&mut ctx, &ids(&["s", "nowhere"]), &SearchOptions::default())
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_too_few_ids_returned_unchanged() {
        let mut ctx = context_for(diamond()).await;
        let path = a_star_with_on_demand_tiles(&mut ctx, &ids(&["s"]), &SearchOptions::default()).await;
        assert_eq!(path, ids(&["s"]));
        assert!(a_star_with_on_demand_tiles(&mut ctx, &[], &SearchOptions::default()).await.is_empty());
    }

    #[tokio::test]
    async fn test_iteration_limit_aborts_softly() {
        let mut ctx = context_for(diamond()).await;
        let options = SearchOptions {
            max_iterations: Some(1),
            ..Default::default()
        };
        let report = find_path(&mut ctx, &ids(&["s", "t"]), &options).await.unwrap();
        assert_eq!(report.outcome, SearchOutcome::IterationLimit);
        assert!(report.path.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_search() {
        let mut ctx = context_for(diamond()).await;
        let token = CancellationToken::new();
        token.cancel();
        let options = SearchOptions {
            cancel: Some(token),
            ..Default::default()
        };
        let report = find_path(&mut ctx, &ids(&["s", "t"]), &options).await.unwrap();
        assert_eq!(report.outcome, SearchOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_path_across_tile_boundary() {
        // "w" sits near the east edge of tile (0,0), "e" near the west edge of (0,1)
        let graph = GraphFile {
            nodes: vec![
                Node::new("start", 0.05, 0.05),
                Node::new("w", 0.05, 0.099),
                Node::new("e", 0.05, 0.101),
                Node::new("end", 0.05, 0.15),
            ],
            edges: vec![edge("start", "w", 1.0), edge("w", "e", 1.0), edge("e", "end", 1.0)],
            bidirectional: true,
        };
        let source = Arc::new(MemoryTileSource::from_graph(graph).unwrap());
        let mut ctx = RoutingContext::new(source, RouterConfig::default());
        ctx.ensure_loaded(TileKey::new(0, 0), FetchMode::Detailed).await.unwrap();
        ctx.ensure_loaded(TileKey::new(0, 1), FetchMode::Detailed).await.unwrap();

        let options = SearchOptions::with_metric(DistanceMetric::Haversine);
        let report = find_path(&mut ctx, &ids(&["start", "end"]), &options).await.unwrap();
        assert_eq!(report.path, ids(&["start", "w", "e", "end"]));
        assert_eq!(report.cost, 3.0);
    }

    #[tokio::test]
    async fn test_intermediate_tile_loads_during_search() {
        let graph = GraphFile {
            nodes: vec![
                Node::new("s", 0.05, 0.05),
                Node::new("w", 0.05, 0.099),
                Node::new("e", 0.05, 0.101),
                Node::new("m", 0.05, 0.15),
                Node::new("x", 0.05, 0.199),
                Node::new("g", 0.05, 0.25),
            ],
            edges: vec![
                edge("s", "w", 1.0),
                edge("w", "e", 1.0),
                edge("e", "m", 1.0),
                edge("m", "x", 1.0),
                edge("x", "g", 1.0),
            ],
            bidirectional: true,
        };
        let source = Arc::new(MemoryTileSource::from_graph(graph).unwrap());
        let mut ctx = RoutingContext::new(source.clone(), RouterConfig::default());
        ctx.ensure_loaded(TileKey::new(0, 0), FetchMode::Detailed).await.unwrap();
        ctx.ensure_loaded(TileKey::new(0, 2), FetchMode::Detailed).await.unwrap();
        assert!(!ctx.store().contains(&TileKey::new(0, 1)));

        let options = SearchOptions {
            preload_corridor: Some(false),
            ..Default::default()
        };
        let report = find_path(&mut ctx, &ids(&["s", "g"]), &options).await.unwrap();

        assert_eq!(report.path, ids(&["s", "w", "e", "m", "x", "g"]));
        assert_eq!(report.cost, 5.0);
        assert_eq!(report.tiles_loaded, 1);
        assert_eq!(source.fetch_count(), 3);
        assert!(ctx.store().contains(&TileKey::new(0, 1)));
    }

    #[tokio::test]
    async fn test_search_survives_eviction_under_cache_pressure() {
        // Six tiles wide; only the pinned start/goal tiles fit the cache
        let source = Arc::new(MemoryTileSource::from_graph(chain(600, 0.0005, 0.001)).unwrap());
        let config = RouterConfig {
            cache: CacheConfig {
                max_tiles: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut ctx = RoutingContext::new(source.clone(), config);
        let (start_tile, goal_tile) = (TileKey::new(0, 0), TileKey::new(0, 5));
        ctx.ensure_loaded(start_tile, FetchMode::Detailed).await.unwrap();
        ctx.ensure_loaded(goal_tile, FetchMode::Detailed).await.unwrap();

        let options = SearchOptions {
            preload_corridor: Some(false),
            ..Default::default()
        };
        let report = find_path(&mut ctx, &ids(&["n0", "n599"]), &options).await.unwrap();

        assert_eq!(report.outcome, SearchOutcome::Found);
        assert_eq!(report.path.len(), 600);
        assert_eq!(report.coordinates.len(), 600);
        assert_eq!(report.cost, 599.0);
        assert!(ctx.cache_stats().cache.tiles_evicted > 0);
        assert!(ctx.store().contains(&start_tile));
        assert!(ctx.store().contains(&goal_tile));
        // Eight distinct tiles were touched, so some came back after eviction
        assert!(source.fetch_count() > 8, "fetches: {}", source.fetch_count());
    }

    #[tokio::test]
    async fn test_mode_switch_refetches_current_tile() {
        // Every periodic check reads as low exploration
        let config = RouterConfig {
            mode: ModeThresholds {
                low_exploration_after: 0,
                low_exploration_rate: 2.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let source = Arc::new(MemoryTileSource::from_graph(chain(550, 0.02, 0.0001)).unwrap());
        let mut ctx = RoutingContext::new(source.clone(), config);
        ctx.ensure_loaded(TileKey::new(0, 0), FetchMode::Detailed).await.unwrap();

        let options = SearchOptions {
            preload_corridor: Some(false),
            ..Default::default()
        };
        let report = find_path(&mut ctx, &ids(&["n0", "n549"]), &options).await.unwrap();

        assert_eq!(report.outcome, SearchOutcome::Found);
        assert_eq!(report.path.len(), 550);
        assert_eq!(report.mode_switches, 1);
        assert_eq!(report.final_mode, FetchMode::Express);
        assert_eq!(source.fetch_count(), 2);
    }
}
