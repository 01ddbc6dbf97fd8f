//! Connectivity diagnostics over the resident graph
//!
//! Read-only helpers used to explain a failed search. Only resident tiles are
//! considered; edges leading into unloaded tiles are ignored.

use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;

use crate::core::error::{Error, Result};
use crate::core::store::TileStore;
use crate::core::tile::NodeId;

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivityReport {
    /// Goal reachable from start along directed edges
    pub connected: bool,
    /// Start and goal share a weakly connected component
    pub same_component: bool,
    /// Size of the weakly connected component holding start
    pub start_component_size: usize,
    /// Size of the weakly connected component holding goal
    pub goal_component_size: usize,
    pub total_nodes: usize,
}

fn reachable_from(store: &TileStore, origin: &str) -> HashSet<NodeId> {
    let mut seen = HashSet::from([origin.to_string()]);
    let mut queue = VecDeque::from([origin.to_string()]);

    while let Some(id) = queue.pop_front() {
        for nb in store.neighbors(&id) {
            if store.contains_node(&nb.id) && seen.insert(nb.id.clone()) {
                queue.push_back(nb.id.clone());
            }
        }
    }
    seen
}

/// Undirected view of every resident edge
fn undirected_adjacency(store: &TileStore) -> HashMap<&str, Vec<&str>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in store.nodes() {
        for nb in store.neighbors(&node.id) {
            if store.contains_node(&nb.id) {
                adjacency.entry(node.id.as_str()).or_default().push(nb.id.as_str());
                adjacency.entry(nb.id.as_str()).or_default().push(node.id.as_str());
            }
        }
    }
    adjacency
}

/// Nodes of the component around `origin` not yet in `visited`
fn component_from<'a>(
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    origin: &'a str,
    visited: &mut HashSet<&'a str>,
) -> Vec<&'a str> {
    let mut component = Vec::new();
    if !visited.insert(origin) {
        return component;
    }
    let mut queue = VecDeque::from([origin]);
    while let Some(id) = queue.pop_front() {
        component.push(id);
        for &next in adjacency.get(id).map(Vec::as_slice).unwrap_or(&[]) {
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }
    component
}

/// Directed reachability from start, plus the components of both ends
///
/// Component sizes use weak connectivity, so two different components never
/// share a node and their sizes sum to at most `total_nodes`.
pub fn check_connectivity(store: &TileStore, start_id: &str, goal_id: &str) -> Result<ConnectivityReport> {
    for id in [start_id, goal_id] {
        if !store.contains_node(id) {
            return Err(Error::NodeNotFound(id.to_string()));
        }
    }

    let adjacency = undirected_adjacency(store);
    let mut visited = HashSet::new();
    let start_component_size = component_from(&adjacency, start_id, &mut visited).len();
    let same_component = visited.contains(goal_id);
    let goal_component_size = if same_component {
        start_component_size
    } else {
        component_from(&adjacency, goal_id, &mut visited).len()
    };

    let report = ConnectivityReport {
        connected: reachable_from(store, start_id).contains(goal_id),
        same_component,
        start_component_size,
        goal_component_size,
        total_nodes: store.node_count(),
    };
    debug!("Connectivity {start_id} -> {goal_id}: {report:?}");
    Ok(report)
}

/// Weakly connected components of the resident graph, largest first
pub fn find_all_components(store: &TileStore) -> Vec<Vec<NodeId>> {
    let adjacency = undirected_adjacency(store);
    let mut visited: HashSet<&str> = HashSet::new();
    let mut components = Vec::new();
    for node in store.nodes() {
        let component = component_from(&adjacency, node.id.as_str(), &mut visited);
        if component.is_empty() {
            continue;
        }
        let mut component: Vec<NodeId> = component.into_iter().map(str::to_string).collect();
        component.sort();
        components.push(component);
    }

    components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tile::{Neighbor, Node, Tile, TileKey};

    fn two_islands() -> TileStore {
        let mut tile = Tile::empty(TileKey::new(0, 0));
        for (id, lat) in [("a", 0.01), ("b", 0.02), ("c", 0.03), ("x", 0.07), ("y", 0.08)] {
            tile.nodes.push(Node::new(id, lat, 0.05));
        }
        for (from, to) in [("a", "b"), ("b", "c"), ("x", "y"), ("y", "x")] {
            tile.neighbors
                .entry(from.to_string())
                .or_default()
                .push(Neighbor::new(to, 1.0));
        }
        // Edge into a tile that is not resident
        tile.neighbors
            .entry("c".to_string())
            .or_default()
            .push(Neighbor::new("elsewhere", 1.0));

        let mut store = TileStore::new();
        store.insert(tile);
        store
    }

    #[test]
    fn test_disconnected_pair() {
        let store = two_islands();
        let report = check_connectivity(&store, "a", "y").unwrap();
        assert!(!report.connected);
        assert!(!report.same_component);
        assert_eq!(report.start_component_size, 3);
        assert_eq!(report.goal_component_size, 2);
        assert!(report.start_component_size + report.goal_component_size <= report.total_nodes);
    }

    #[test]
    fn test_connected_is_directional() {
        let store = two_islands();
        assert!(check_connectivity(&store, "a", "c").unwrap().connected);
        assert!(!check_connectivity(&store, "c", "a").unwrap().connected);
        assert!(matches!(
            check_connectivity(&store, "a", "elsewhere"),
            Err(Error::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_one_way_chain_sizes_stay_within_node_count() {
        // y -> a -> b: a cannot reach y, yet all three form one component
        let mut tile = Tile::empty(TileKey::new(0, 0));
        for (id, lat) in [("y", 0.01), ("a", 0.02), ("b", 0.03)] {
            tile.nodes.push(Node::new(id, lat, 0.05));
        }
        for (from, to) in [("y", "a"), ("a", "b")] {
            tile.neighbors
                .entry(from.to_string())
                .or_default()
                .push(Neighbor::new(to, 1.0));
        }
        let mut store = TileStore::new();
        store.insert(tile);

        let report = check_connectivity(&store, "a", "y").unwrap();
        assert!(!report.connected);
        assert!(report.same_component);
        assert_eq!(report.start_component_size, 3);
        assert_eq!(report.goal_component_size, 3);
        assert!(report.start_component_size <= report.total_nodes);
        assert!(check_connectivity(&store, "y", "b").unwrap().connected);
    }

    #[test]
    fn test_find_all_components() {
        let components = find_all_components(&two_islands());
        assert_eq!(components.len(), 2);
        assert_eq!(components[0], vec!["a", "b", "c"]);
        assert_eq!(components[1], vec!["x", "y"]);
    }
}
