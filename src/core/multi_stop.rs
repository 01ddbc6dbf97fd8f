//! Multi-stop routing
//!
//! Solves consecutive stop pairs with the A* engine and stitches the legs.
//! A leg that repeats an earlier (from, to) pair reuses the earlier result.

use std::collections::HashMap;

use log::{info, warn};

use crate::core::astar::{find_path, SearchOptions, SearchOutcome};
use crate::core::context::RoutingContext;
use crate::core::error::{Error, Result};
use crate::core::tile::NodeId;

#[derive(Debug, Clone, PartialEq)]
pub struct LegSummary {
    pub from: NodeId,
    pub to: NodeId,
    pub cost: f64,
    pub nodes: usize,
    /// Served from an identical earlier leg
    pub reused: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiStopRoute {
    /// Full path; empty when any leg failed
    pub path: Vec<NodeId>,
    /// `(lat, lon)` for each node of `path`
    pub coordinates: Vec<(f64, f64)>,
    pub cost: f64,
    pub legs: Vec<LegSummary>,
    /// Index of the first leg without a path
    pub failed_leg: Option<usize>,
}

impl MultiStopRoute {
    pub fn is_complete(&self) -> bool {
        self.failed_leg.is_none() && !self.path.is_empty()
    }
}

/// Route through every stop in order
///
/// Fewer than two stops are returned unchanged. Fatal search errors (unknown
/// stop ids, unloadable start/goal tiles) are propagated.
pub async fn find_multi_stop_path(
    ctx: &mut RoutingContext,
    stops: &[NodeId],
    options: &SearchOptions,
) -> Result<MultiStopRoute> {
    if stops.len() < 2 {
        warn!("Multi-stop route needs at least 2 stops, got {}", stops.len());
        return Ok(MultiStopRoute {
            path: stops.to_vec(),
            coordinates: stops
                .iter()
                .filter_map(|id| ctx.store.node(id))
                .map(|n| (n.lat, n.lon))
                .collect(),
            ..Default::default()
        });
    }

    type Leg = (Vec<NodeId>, Vec<(f64, f64)>, f64);
    let mut memo: HashMap<(NodeId, NodeId), Leg> = HashMap::new();
    let mut route = MultiStopRoute::default();

    for (index, pair) in stops.windows(2).enumerate() {
        let (from, to) = (&pair[0], &pair[1]);
        let memo_key = (from.clone(), to.clone());

        let (leg_path, leg_coords, leg_cost, reused) = if from == to {
            let node = ctx.store.node(from).ok_or_else(|| Error::NodeNotFound(from.clone()))?;
            (vec![from.clone()], vec![(node.lat, node.lon)], 0.0, false)
        } else if let Some((path, coords, cost)) = memo.get(&memo_key) {
            (path.clone(), coords.clone(), *cost, true)
        } else {
            let report = find_path(ctx, &[from.clone(), to.clone()], options).await?;
            if report.outcome != SearchOutcome::Found {
                warn!(
                    "Leg {} ({from} -> {to}) failed: {:?}, dropping the whole route",
                    index + 1,
                    report.outcome
                );
                route.path.clear();
                route.coordinates.clear();
                route.failed_leg = Some(index);
                return Ok(route);
            }
            memo.insert(memo_key, (report.path.clone(), report.coordinates.clone(), report.cost));
            (report.path, report.coordinates, report.cost, false)
        };

        route.legs.push(LegSummary {
            from: from.clone(),
            to: to.clone(),
            cost: leg_cost,
            nodes: leg_path.len(),
            reused,
        });
        route.cost += leg_cost;

        // Junction node is already the last node of the previous leg
        let skip = usize::from(!route.path.is_empty());
        route.path.extend(leg_path.into_iter().skip(skip));
        route.coordinates.extend(leg_coords.into_iter().skip(skip));
    }

    info!(
        "Multi-stop route: {} legs, {} nodes, cost {:.1}",
        route.legs.len(),
        route.path.len(),
        route.cost
    );
    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RouterConfig;
    use crate::core::mode::FetchMode;
    use crate::core::source::{GraphEdge, GraphFile, MemoryTileSource};
    use crate::core::tile::{Node, TileKey};
    use std::sync::Arc;

    async fn line_context(bidirectional: bool) -> RoutingContext {
        let names = ["a", "b", "c", "d"];
        let graph = GraphFile {
            nodes: names
                .iter()
                .enumerate()
                .map(|(i, n)| Node::new(*n, 0.05, 0.02 + i as f64 * 0.02))
                .collect(),
            edges: names
                .windows(2)
                .map(|w| GraphEdge {
                    from: w[0].to_string(),
                    to: w[1].to_string(),
                    weight: Some(1.0),
                })
                .collect(),
            bidirectional,
        };
        let source = Arc::new(MemoryTileSource::from_graph(graph).unwrap());
        let mut ctx = RoutingContext::new(source, RouterConfig::default());
        ctx.ensure_loaded(TileKey::new(0, 0), FetchMode::Detailed).await.unwrap();
        ctx
    }

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_legs_are_stitched_without_duplicate_junctions() {
        let mut ctx = line_context(true).await;
        let route = find_multi_stop_path(&mut ctx, &ids(&["a", "c", "b"]), &SearchOptions::default())
            .await
            .unwrap();

        assert!(route.is_complete());
        assert_eq!(route.path, ids(&["a", "b", "c", "b"]));
        assert_eq!(route.coordinates.len(), route.path.len());
        assert_eq!(route.coordinates[2], (0.05, 0.02 + 2.0 * 0.02));
        assert_eq!(route.cost, 3.0);
        assert_eq!(route.legs.len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_leg_is_reused() {
        let mut ctx = line_context(true).await;
        let route = find_multi_stop_path(&mut ctx, &ids(&["a", "d", "a", "d"]), &SearchOptions::default())
            .await
            .unwrap();

        assert!(!route.legs[0].reused);
        assert!(!route.legs[1].reused);
        assert!(route.legs[2].reused);
        assert_eq!(route.cost, 9.0);
        assert_eq!(route.path.len(), 10);
    }

    #[tokio::test]
    async fn test_failed_leg_empties_route() {
        let mut ctx = line_context(false).await;
        let route = find_multi_stop_path(&mut ctx, &ids(&["a", "d", "b"]), &SearchOptions::default())
            .await
            .unwrap();

        assert!(route.path.is_empty());
        assert_eq!(route.failed_leg, Some(1));
        assert!(!route.is_complete());
    }
}
