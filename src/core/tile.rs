//! Tile and node schema
//!
//! The road graph is partitioned into a fixed grid of `TILE_SIZE`-degree cells.
//! A tile holds the nodes located in its cell plus their outgoing adjacency.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};

/// Edge length of a tile in degrees
pub const TILE_SIZE: f64 = 0.1;

/// Node identifier as delivered by the tile source
pub type NodeId = String;

/// A road-graph vertex. Coordinates never change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, lat: f64, lon: f64) -> Self {
        Self {
            id: id.into(),
            lat,
            lon,
            elevation: None,
        }
    }

    /// Key of the tile this node falls into
    pub fn tile_key(&self) -> TileKey {
        TileKey::for_coord(self.lat, self.lon)
    }
}

/// Directed, weighted adjacency entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: NodeId,
    pub weight: f64,
}

impl Neighbor {
    pub fn new(id: impl Into<NodeId>, weight: f64) -> Self {
        Self {
            id: id.into(),
            weight,
        }
    }
}

/// Grid cell index, rendered as `"{lat_index},{lon_index}"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TileKey {
    pub lat_index: i32,
    pub lon_index: i32,
}

impl TileKey {
    pub const fn new(lat_index: i32, lon_index: i32) -> Self {
        Self {
            lat_index,
            lon_index,
        }
    }

    /// Tile containing the given coordinate
    pub fn for_coord(lat: f64, lon: f64) -> Self {
        Self {
            lat_index: (lat / TILE_SIZE).floor() as i32,
            lon_index: (lon / TILE_SIZE).floor() as i32,
        }
    }

    /// Key shifted by whole tiles
    pub fn offset(&self, d_lat: i32, d_lon: i32) -> Self {
        Self::new(self.lat_index + d_lat, self.lon_index + d_lon)
    }

    /// The 8 surrounding tiles
    pub fn neighbors(&self) -> [TileKey; 8] {
        [
            self.offset(-1, -1),
            self.offset(-1, 0),
            self.offset(-1, 1),
            self.offset(0, -1),
            self.offset(0, 1),
            self.offset(1, -1),
            self.offset(1, 0),
            self.offset(1, 1),
        ]
    }

    /// `(min_lat, min_lon, max_lat, max_lon)` of the cell
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let min_lat = self.lat_index as f64 * TILE_SIZE;
        let min_lon = self.lon_index as f64 * TILE_SIZE;
        (min_lat, min_lon, min_lat + TILE_SIZE, min_lon + TILE_SIZE)
    }

    /// Filesystem-safe form of the key
    pub fn file_stem(&self) -> String {
        self.to_string().replace(',', "_")
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat_index, self.lon_index)
    }
}

impl FromStr for TileKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (lat, lon) = s
            .split_once(',')
            .ok_or_else(|| Error::InvalidInput(format!("Malformed tile key '{s}'")))?;

        let lat_index = lat
            .trim()
            .parse::<i32>()
            .map_err(|e| Error::InvalidInput(format!("Malformed tile key '{s}': {e}")))?;
        let lon_index = lon
            .trim()
            .parse::<i32>()
            .map_err(|e| Error::InvalidInput(format!("Malformed tile key '{s}': {e}")))?;

        Ok(Self::new(lat_index, lon_index))
    }
}

impl TryFrom<String> for TileKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TileKey> for String {
    fn from(key: TileKey) -> Self {
        key.to_string()
    }
}

/// Contents of one grid cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub tile_key: TileKey,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub neighbors: HashMap<NodeId, Vec<Neighbor>>,
}

// Rough per-item costs used for the memory ceiling
const NODE_OVERHEAD_BYTES: usize = 64;
const EDGE_OVERHEAD_BYTES: usize = 32;

impl Tile {
    /// A tile with no road data (e.g. open sea)
    pub fn empty(tile_key: TileKey) -> Self {
        Self {
            tile_key,
            nodes: Vec::new(),
            neighbors: HashMap::new(),
        }
    }

    pub fn edge_count(&self) -> usize {
        self.neighbors.values().map(Vec::len).sum()
    }

    /// Approximate resident size of the tile
    pub fn estimated_size_bytes(&self) -> usize {
        let nodes: usize = self
            .nodes
            .iter()
            .map(|n| NODE_OVERHEAD_BYTES + n.id.len())
            .sum();
        let edges: usize = self
            .neighbors
            .iter()
            .map(|(id, list)| {
                id.len()
                    + list
                        .iter()
                        .map(|nb| EDGE_OVERHEAD_BYTES + nb.id.len())
                        .sum::<usize>()
            })
            .sum();
        nodes + edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_key_for_coord() {
        assert_eq!(TileKey::for_coord(50.85, 4.35), TileKey::new(508, 43));
        assert_eq!(TileKey::for_coord(-0.05, -0.05), TileKey::new(-1, -1));
        assert_eq!(TileKey::for_coord(0.0, 0.0), TileKey::new(0, 0));
    }

    #[test]
    fn test_tile_key_string_form() {
        let key = TileKey::new(508, -43);
        assert_eq!(key.to_string(), "508,-43");
        assert_eq!("508,-43".parse::<TileKey>().unwrap(), key);
        assert_eq!(key.file_stem(), "508_-43");
        assert!("508".parse::<TileKey>().is_err());
        assert!("a,b".parse::<TileKey>().is_err());
    }

    #[test]
    fn test_tile_key_neighbors_are_distinct() {
        let key = TileKey::new(10, 10);
        let neighbors = key.neighbors();
        assert_eq!(neighbors.len(), 8);
        assert!(!neighbors.contains(&key));
        assert!(neighbors.contains(&TileKey::new(11, 9)));
        assert!(neighbors.contains(&TileKey::new(9, 11)));
    }

    #[test]
    fn test_tile_json_shape() {
        let mut tile = Tile::empty(TileKey::new(1, 2));
        tile.nodes.push(Node::new("a", 0.15, 0.25));
        tile.neighbors
            .insert("a".to_string(), vec![Neighbor::new("b", 12.5)]);

        let json = serde_json::to_value(&tile).unwrap();
        assert_eq!(json["tileKey"], "1,2");
        assert_eq!(json["nodes"][0]["id"], "a");
        assert!(json["nodes"][0].get("elevation").is_none());
        assert_eq!(json["neighbors"]["a"][0]["weight"], 12.5);

        let back: Tile = serde_json::from_value(json).unwrap();
        assert_eq!(back, tile);
    }

    #[test]
    fn test_estimated_size_grows_with_content() {
        let mut tile = Tile::empty(TileKey::new(0, 0));
        let empty = tile.estimated_size_bytes();
        tile.nodes.push(Node::new("n1", 0.01, 0.01));
        tile.neighbors
            .insert("n1".to_string(), vec![Neighbor::new("n2", 1.0)]);
        assert!(tile.estimated_size_bytes() > empty);
        assert_eq!(tile.edge_count(), 1);
    }
}
