//! Tile sources for butterfly-tiles
//!
//! A tile source turns a tile key and a fetch-detail mode into tile contents.
//! `HttpTileSource` talks to a remote tile service; `MemoryTileSource` serves
//! tiles partitioned from a graph file held in memory.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::geo::haversine_distance;
use crate::core::mode::FetchMode;
use crate::core::tile::{Neighbor, Node, NodeId, Tile, TileKey};

/// Anything able to produce the contents of a tile
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Fetch one tile at the requested level of detail
    async fn fetch(&self, key: TileKey, mode: FetchMode) -> Result<Tile>;

    /// Short name used in log lines
    fn name(&self) -> &str;
}

/// Configuration for the HTTP tile source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the tile service; tiles live under `{base_url}/tiles/{lat}/{lon}`
    pub base_url: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Retries after the first attempt, network errors only
    pub retry_attempts: u32,
    /// Base delay for exponential backoff
    pub retry_base_delay_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
            retry_attempts: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

/// Execute an operation, retrying with exponential backoff on network errors
async fn retry_on_network_error<F, Fut, T>(attempts: u32, base_delay_ms: u64, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(Error::NetworkError(msg)) if attempt < attempts => {
                attempt += 1;
                let delay = base_delay_ms * (1 << (attempt - 1));
                warn!("Network error (attempt {attempt}): {msg}. Retrying in {delay}ms...");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Tile source backed by a remote HTTP tile service
pub struct HttpTileSource {
    client: Client,
    config: SourceConfig,
}

impl HttpTileSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .tcp_keepalive(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(format!("butterfly-tiles/{}", env!("BUTTERFLY_VERSION")))
            .build()
            .map_err(|e| Error::HttpError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    fn tile_url(&self, key: TileKey) -> String {
        format!(
            "{}/tiles/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            key.lat_index,
            key.lon_index
        )
    }

    async fn fetch_once(&self, url: &str, key: TileKey, mode: FetchMode) -> Result<Tile> {
        let response = self
            .client
            .get(url)
            .query(&[("mode", mode.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Tile {key} not served by source, treating as empty");
            return Ok(Tile::empty(key));
        }
        if status.is_server_error() {
            // 5xx responses are as transient as a dropped connection
            return Err(Error::NetworkError(format!("{status} from {url}")));
        }
        if !status.is_success() {
            return Err(Error::HttpError(format!("Unexpected status {status} from {url}")));
        }

        let body = response.bytes().await?;
        let mut tile: Tile = serde_json::from_slice(&body)?;
        if tile.tile_key != key {
            warn!("Source returned tile {} for request {key}, re-keying", tile.tile_key);
            tile.tile_key = key;
        }
        Ok(tile)
    }
}

#[async_trait]
impl TileSource for HttpTileSource {
    async fn fetch(&self, key: TileKey, mode: FetchMode) -> Result<Tile> {
        let url = self.tile_url(key);
        retry_on_network_error(self.config.retry_attempts, self.config.retry_base_delay_ms, || {
            self.fetch_once(&url, key, mode)
        })
        .await
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Edge entry of a graph file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: NodeId,
    pub to: NodeId,
    /// Travel cost; great-circle meters between the endpoints when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// Whole road graph in one JSON document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphFile {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    /// Add the reverse of every edge
    #[serde(default)]
    pub bidirectional: bool,
}

impl GraphFile {
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Tile source serving an in-memory graph, partitioned into tiles up front
///
/// Every mode returns the full detail of the graph.
#[derive(Debug, Default)]
pub struct MemoryTileSource {
    tiles: HashMap<TileKey, Tile>,
    fetches: AtomicUsize,
}

impl MemoryTileSource {
    /// Partition a graph into tiles; an edge lives in the tile of its origin node
    pub fn from_graph(graph: GraphFile) -> Result<Self> {
        let mut tiles: HashMap<TileKey, Tile> = HashMap::new();
        let mut locations: HashMap<NodeId, (f64, f64)> = HashMap::new();

        for node in graph.nodes {
            locations.insert(node.id.clone(), (node.lat, node.lon));
            let key = node.tile_key();
            tiles
                .entry(key)
                .or_insert_with(|| Tile::empty(key))
                .nodes
                .push(node);
        }

        let mut add_edge = |from: &str, to: &str, weight: Option<f64>| -> Result<()> {
            let (from_lat, from_lon) = *locations
                .get(from)
                .ok_or_else(|| Error::InvalidInput(format!("Edge references unknown node '{from}'")))?;
            let (to_lat, to_lon) = *locations
                .get(to)
                .ok_or_else(|| Error::InvalidInput(format!("Edge references unknown node '{to}'")))?;

            let weight = weight.unwrap_or_else(|| haversine_distance(from_lat, from_lon, to_lat, to_lon));
            if weight.is_nan() || weight < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "Edge {from} -> {to} has invalid weight {weight}"
                )));
            }

            let key = TileKey::for_coord(from_lat, from_lon);
            tiles
                .entry(key)
                .or_insert_with(|| Tile::empty(key))
                .neighbors
                .entry(from.to_string())
                .or_default()
                .push(Neighbor::new(to, weight));
            Ok(())
        };

        for edge in &graph.edges {
            add_edge(&edge.from, &edge.to, edge.weight)?;
            if graph.bidirectional {
                add_edge(&edge.to, &edge.from, edge.weight)?;
            }
        }

        debug!("Partitioned graph into {} tiles", tiles.len());
        Ok(Self {
            tiles,
            fetches: AtomicUsize::new(0),
        })
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_graph(GraphFile::from_path(path).await?)
    }

    /// Number of `fetch` calls served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn tile_keys(&self) -> impl Iterator<Item = &TileKey> {
        self.tiles.keys()
    }

    pub fn node_count(&self) -> usize {
        self.tiles.values().map(|t| t.nodes.len()).sum()
    }
}

#[async_trait]
impl TileSource for MemoryTileSource {
    async fn fetch(&self, key: TileKey, _mode: FetchMode) -> Result<Tile> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .tiles
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Tile::empty(key)))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
