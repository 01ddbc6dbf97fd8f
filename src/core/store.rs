//! Tile Store and incrementally maintained Node Index
//!
//! The store is the only owner of resident tile data. The node index is kept
//! in step with it: nodes are indexed when their tile is inserted and dropped
//! once no resident tile owns them anymore.

use std::collections::HashMap;

use log::trace;

use crate::core::geo::haversine_distance;
use crate::core::tile::{Neighbor, Node, NodeId, Tile, TileKey};

/// Index entry: the node plus every resident tile that lists it
#[derive(Debug, Clone)]
struct IndexedNode {
    node: Node,
    owners: Vec<TileKey>,
}

/// Keyed map of resident tiles
#[derive(Debug, Default)]
pub struct TileStore {
    tiles: HashMap<TileKey, Tile>,
    nodes: HashMap<NodeId, IndexedNode>,
    estimated_bytes: usize,
}

impl TileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.tiles.contains_key(key)
    }

    pub fn get(&self, key: &TileKey) -> Option<&Tile> {
        self.tiles.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &TileKey> {
        self.tiles.keys()
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    /// Approximate memory held by resident tiles
    pub fn estimated_bytes(&self) -> usize {
        self.estimated_bytes
    }

    /// Insert a tile, replacing any tile already stored under the same key
    pub fn insert(&mut self, tile: Tile) -> Option<Tile> {
        let key = tile.tile_key;
        let previous = self.remove(&key);

        for node in &tile.nodes {
            self.nodes
                .entry(node.id.clone())
                .and_modify(|entry| entry.owners.push(key))
                .or_insert_with(|| IndexedNode {
                    node: node.clone(),
                    owners: vec![key],
                });
        }

        self.estimated_bytes += tile.estimated_size_bytes();
        trace!("Stored tile {key} ({} nodes)", tile.nodes.len());
        self.tiles.insert(key, tile);
        previous
    }

    /// Remove a tile and every index entry no other tile still owns
    pub fn remove(&mut self, key: &TileKey) -> Option<Tile> {
        let tile = self.tiles.remove(key)?;

        for node in &tile.nodes {
            let orphaned = match self.nodes.get_mut(&node.id) {
                Some(entry) => {
                    entry.owners.retain(|owner| owner != key);
                    entry.owners.is_empty()
                }
                None => false,
            };
            if orphaned {
                self.nodes.remove(&node.id);
            }
        }

        self.estimated_bytes = self
            .estimated_bytes
            .saturating_sub(tile.estimated_size_bytes());
        Some(tile)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id).map(|entry| &entry.node)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().map(|entry| &entry.node)
    }

    /// Resident tiles listing the node
    pub fn owners(&self, id: &str) -> &[TileKey] {
        self.nodes
            .get(id)
            .map(|entry| entry.owners.as_slice())
            .unwrap_or(&[])
    }

    /// Outgoing edges of a node, gathered from every resident tile that owns it
    pub fn neighbors<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Neighbor> + 'a {
        self.owners(id)
            .iter()
            .filter_map(move |key| self.tiles.get(key))
            .filter_map(move |tile| tile.neighbors.get(id))
            .flatten()
    }

    /// Closest resident node to a coordinate
    pub fn nearest_node(&self, lat: f64, lon: f64) -> Option<&Node> {
        self.nodes().min_by(|a, b| {
            let da = haversine_distance(lat, lon, a.lat, a.lon);
            let db = haversine_distance(lat, lon, b.lat, b.lon);
            da.total_cmp(&db)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile_with(key: TileKey, nodes: &[(&str, f64, f64)], edges: &[(&str, &str, f64)]) -> Tile {
        let mut tile = Tile::empty(key);
        for (id, lat, lon) in nodes {
            tile.nodes.push(Node::new(*id, *lat, *lon));
        }
        for (from, to, w) in edges {
            tile.neighbors
                .entry(from.to_string())
                .or_default()
                .push(Neighbor::new(*to, *w));
        }
        tile
    }

    #[test]
    fn test_insert_indexes_nodes() {
        let mut store = TileStore::new();
        let key = TileKey::new(0, 0);
        store.insert(tile_with(key, &[("a", 0.01, 0.01), ("b", 0.02, 0.02)], &[("a", "b", 1.0)]));

        assert_eq!(store.len(), 1);
        assert_eq!(store.node_count(), 2);
        assert_eq!(store.node("a").unwrap().lat, 0.01);
        assert_eq!(store.neighbors("a").count(), 1);
        assert_eq!(store.neighbors("b").count(), 0);
        assert!(store.estimated_bytes() > 0);
    }

    #[test]
    fn test_remove_drops_only_orphaned_nodes() {
        let mut store = TileStore::new();
        let k1 = TileKey::new(0, 0);
        let k2 = TileKey::new(0, 1);
        // "shared" sits on the boundary and is listed by both tiles
        store.insert(tile_with(k1, &[("a", 0.01, 0.01), ("shared", 0.05, 0.1)], &[("shared", "a", 1.0)]));
        store.insert(tile_with(k2, &[("b", 0.01, 0.15), ("shared", 0.05, 0.1)], &[("shared", "b", 2.0)]));

        assert_eq!(store.node_count(), 3);
        assert_eq!(store.neighbors("shared").count(), 2);

        store.remove(&k1);
        assert!(!store.contains_node("a"));
        assert!(store.contains_node("shared"));
        assert_eq!(store.owners("shared"), &[k2]);
        assert_eq!(store.neighbors("shared").count(), 1);

        store.remove(&k2);
        assert_eq!(store.node_count(), 0);
        assert_eq!(store.estimated_bytes(), 0);
    }

    #[test]
    fn test_insert_replaces_same_key() {
        let mut store = TileStore::new();
        let key = TileKey::new(3, 3);
        store.insert(tile_with(key, &[("old", 0.31, 0.31)], &[]));
        let previous = store.insert(tile_with(key, &[("new", 0.32, 0.32)], &[]));

        assert!(previous.is_some());
        assert_eq!(store.len(), 1);
        assert!(!store.contains_node("old"));
        assert!(store.contains_node("new"));
    }

    #[test]
    fn test_nearest_node() {
        let mut store = TileStore::new();
        store.insert(tile_with(
            TileKey::new(0, 0),
            &[("near", 0.010, 0.010), ("far", 0.090, 0.090)],
            &[],
        ));
        assert_eq!(store.nearest_node(0.011, 0.012).unwrap().id, "near");
        assert!(TileStore::new().nearest_node(0.0, 0.0).is_none());
    }
}
