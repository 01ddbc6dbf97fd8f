//! # Butterfly-tiles CLI
//!
//! Command-line interface for the butterfly-tiles library: route between
//! coordinates, preload corridors, inspect connectivity and maintain the disk
//! spill cache.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use butterfly_tiles::{
    check_connectivity, find_all_components, haversine_distance, mode_for_distance, route_points, DiskCache,
    DiskCacheConfig, HttpTileSource, LatLng, MemoryTileSource, RouteRequest, RouterConfig, RoutingContext,
    TileSource,
};
use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};

mod cli;

/// Command-line interface for butterfly-tiles
#[derive(Parser)]
#[command(name = "butterfly-tiles")]
#[command(about = "A* routing over lazily fetched, cached road-network tiles")]
#[command(long_about = "Routes over a tiled road graph fetched on demand:
  butterfly-tiles --graph graph.json route --from 50.85,4.35 --to 50.88,4.70
  butterfly-tiles --source-url http://tiles:8080 preload --from 50.85,4.35 --to 51.22,4.40
  butterfly-tiles --cache-dir ./cache cache-stats")]
#[command(version = env!("BUTTERFLY_VERSION"))]
struct Cli {
    /// Serve tiles from a local graph file (JSON nodes + edges)
    #[arg(long, global = true, conflicts_with = "source_url")]
    graph: Option<PathBuf>,

    /// Fetch tiles from an HTTP tile service
    #[arg(long, global = true)]
    source_url: Option<String>,

    /// Directory of the disk spill cache
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Find a route between coordinates and print it as JSON
    Route {
        #[arg(long, value_parser = parse_coord)]
        from: LatLng,
        #[arg(long, value_parser = parse_coord)]
        to: LatLng,
        /// Intermediate stops, in order
        #[arg(long, value_parser = parse_coord)]
        via: Vec<LatLng>,
        /// Heuristic distance metric: euclidean or haversine
        #[arg(long)]
        metric: Option<String>,
    },
    /// Load the tile corridor between two coordinates into the caches
    Preload {
        #[arg(long, value_parser = parse_coord)]
        from: LatLng,
        #[arg(long, value_parser = parse_coord)]
        to: LatLng,
        /// Corridor width in tiles on each side; derived from the distance when omitted
        #[arg(long)]
        buffer: Option<i32>,
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Check whether two coordinates are connected in the loaded graph
    Connectivity {
        #[arg(long, value_parser = parse_coord)]
        from: LatLng,
        #[arg(long, value_parser = parse_coord)]
        to: LatLng,
    },
    /// Show disk spill cache statistics
    CacheStats,
    /// Evict least-frequently-used disk cache entries
    CacheEvict {
        #[arg(long)]
        max_size_mb: u64,
    },
}

/// Parse `"lat,lon"`
fn parse_coord(s: &str) -> std::result::Result<LatLng, String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("expected 'lat,lon', got '{s}'"))?;
    let lat: f64 = lat.trim().parse().map_err(|e| format!("invalid latitude '{lat}': {e}"))?;
    let lon: f64 = lon.trim().parse().map_err(|e| format!("invalid longitude '{lon}': {e}"))?;
    Ok(LatLng::new(lat, lon))
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr; RUST_LOG overrides the default level
    env_logger::Builder::new()
        .filter_level(if cli.verbose { LevelFilter::Debug } else { LevelFilter::Warn })
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    info!("Butterfly-tiles v{} starting", env!("BUTTERFLY_VERSION"));
    let config = load_config(&cli)?;

    match &cli.command {
        Command::Route { from, to, via, metric } => {
            let mut ctx = open_context(&cli, config).await?;
            let mut points = vec![*from];
            points.extend(via.iter().copied());
            points.push(*to);
            let request = RouteRequest {
                points,
                distance_metric: metric.clone(),
            };

            let response = route_points(&mut ctx, &request).await?;
            if response.path.is_empty() {
                eprintln!("No route found");
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
            report_stats(&ctx);
        }
        Command::Preload {
            from,
            to,
            buffer,
            batch_size,
        } => {
            let mut ctx = open_context(&cli, config).await?;
            let buffer = buffer.unwrap_or_else(|| ctx.corridor_buffer(from.lat, from.lng, to.lat, to.lng));
            let batch_size = batch_size.unwrap_or(ctx.config().loader.preload_batch_size);
            let distance = haversine_distance(from.lat, from.lng, to.lat, to.lng);
            let mode = mode_for_distance(distance, &ctx.config().mode);

            let progress = cli::ProgressManager::new(0, &format!("Preloading corridor ({mode} detail)"));
            let report = ctx
                .preload_corridor(
                    (from.lat, from.lng),
                    (to.lat, to.lng),
                    buffer,
                    mode,
                    batch_size,
                    Some(progress.callback()),
                )
                .await;
            progress.pb.finish_and_clear();

            println!(
                "Corridor: {} tiles, {} loaded, {} already resident, {} failed, {} skipped",
                report.requested, report.loaded, report.already_resident, report.failed, report.skipped
            );
            report_stats(&ctx);
        }
        Command::Connectivity { from, to } => {
            let mut ctx = open_context(&cli, config).await?;
            let distance = haversine_distance(from.lat, from.lng, to.lat, to.lng);
            let mode = mode_for_distance(distance, &ctx.config().mode);
            for point in [from, to] {
                ctx.ensure_loaded_for_coord(point.lat, point.lng, mode).await?;
            }

            let snap = |point: &LatLng| {
                ctx.store()
                    .nearest_node(point.lat, point.lng)
                    .map(|n| n.id.clone())
                    .ok_or_else(|| anyhow!("no road node near {},{}", point.lat, point.lng))
            };
            let start = snap(from)?;
            let goal = snap(to)?;

            let report = check_connectivity(ctx.store(), &start, &goal)?;
            let components = find_all_components(ctx.store());
            println!("Start node:      {start}");
            println!("Goal node:       {goal}");
            println!("Connected:       {}", report.connected);
            println!("Same component:  {}", report.same_component);
            println!("Start component: {} nodes", report.start_component_size);
            println!("Goal component:  {} nodes", report.goal_component_size);
            println!("Resident nodes:  {}", report.total_nodes);
            println!("Components:      {}", components.len());
        }
        Command::CacheStats => {
            let disk = open_disk(&config).await?;
            let stats = disk.stats();
            println!("Cache directory: {}", disk.dir().display());
            println!("Entries:         {}", stats.entries);
            println!("Total size:      {} bytes", stats.total_bytes);
        }
        Command::CacheEvict { max_size_mb } => {
            let mut disk = open_disk(&config).await?;
            let result = disk.evict_lfu(*max_size_mb).await?;
            println!(
                "Deleted {} entries, freed {} bytes ({} -> {} bytes)",
                result.entries_deleted, result.bytes_freed, result.size_before, result.size_after
            );
        }
    }

    Ok(())
}

/// Configuration file (if any) with command-line overrides applied
fn load_config(cli: &Cli) -> Result<RouterConfig> {
    let mut config = match &cli.config {
        Some(path) => RouterConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RouterConfig::default(),
    };

    if let Some(dir) = &cli.cache_dir {
        let disk = config.disk.get_or_insert_with(DiskCacheConfig::default);
        disk.dir = dir.clone();
    }
    if let Some(url) = &cli.source_url {
        config.source.base_url = url.clone();
    }
    Ok(config)
}

async fn open_context(cli: &Cli, config: RouterConfig) -> Result<RoutingContext> {
    let source: Arc<dyn TileSource> = match (&cli.graph, &cli.source_url) {
        (Some(path), _) => Arc::new(
            MemoryTileSource::from_path(path)
                .await
                .with_context(|| format!("Failed to read graph {}", path.display()))?,
        ),
        (None, Some(_)) => Arc::new(HttpTileSource::new(config.source.clone())?),
        (None, None) => return Err(anyhow!("a tile source is required: pass --graph FILE or --source-url URL")),
    };
    info!("Using {} tile source", source.name());
    Ok(RoutingContext::open(source, config).await?)
}

async fn open_disk(config: &RouterConfig) -> Result<DiskCache> {
    let disk_config = config
        .disk
        .as_ref()
        .ok_or_else(|| anyhow!("no disk cache configured: pass --cache-dir DIR"))?;
    Ok(DiskCache::open(&disk_config.dir).await?)
}

fn report_stats(ctx: &RoutingContext) {
    let stats = ctx.cache_stats();
    eprintln!(
        "Tiles: {} resident ({} nodes, ~{} KB), {} from disk, {} fetched, {} failed, {} evicted",
        stats.resident_tiles,
        stats.resident_nodes,
        stats.estimated_bytes / 1024,
        stats.loader.disk_hits,
        stats.loader.network_fetches,
        stats.loader.failures,
        stats.cache.tiles_evicted
    );
}
