//! Coordinate route requests
//!
//! Accepts the `{points, distanceMetric}` request shape, snaps each point to
//! the nearest resident node and answers with the path as coordinates.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::astar::SearchOptions;
use crate::core::context::RoutingContext;
use crate::core::error::{Error, Result};
use crate::core::geo::{haversine_distance, DistanceMetric};
use crate::core::mode::mode_for_distance;
use crate::core::multi_stop::find_multi_stop_path;
use crate::core::tile::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRequest {
    pub points: Vec<LatLng>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_metric: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub path: Vec<LatLng>,
}

impl RouteRequest {
    /// Check the request and resolve its distance metric
    pub fn validate(&self) -> Result<DistanceMetric> {
        if self.points.len() < 2 {
            return Err(Error::InvalidInput(format!(
                "At least 2 points are required, got {}",
                self.points.len()
            )));
        }
        for point in &self.points {
            let valid = (-90.0..=90.0).contains(&point.lat) && (-180.0..=180.0).contains(&point.lng);
            if !valid {
                return Err(Error::InvalidInput(format!(
                    "Point ({}, {}) is outside valid coordinates",
                    point.lat, point.lng
                )));
            }
        }
        Ok(DistanceMetric::from_name(self.distance_metric.as_deref()))
    }
}

/// Route through the requested points in order
///
/// Each point's tile is loaded at the detail level the first-to-last
/// distance calls for, then the point snaps to the closest resident node.
/// An unroutable request answers with an empty path.
pub async fn route_points(ctx: &mut RoutingContext, request: &RouteRequest) -> Result<RouteResponse> {
    let metric = request.validate()?;

    let (first, last) = (request.points[0], request.points[request.points.len() - 1]);
    let span = haversine_distance(first.lat, first.lng, last.lat, last.lng);
    let mode = mode_for_distance(span, &ctx.config.mode);

    for point in &request.points {
        ctx.ensure_loaded_for_coord(point.lat, point.lng, mode).await?;
    }

    let mut stops: Vec<NodeId> = Vec::with_capacity(request.points.len());
    for point in &request.points {
        let node = ctx.store.nearest_node(point.lat, point.lng).ok_or_else(|| {
            Error::NodeNotFound(format!("no road node near ({}, {})", point.lat, point.lng))
        })?;
        debug!(
            "Snapped ({}, {}) to node {} ({:.0} m away)",
            point.lat,
            point.lng,
            node.id,
            haversine_distance(point.lat, point.lng, node.lat, node.lon)
        );
        stops.push(node.id.clone());
    }

    let options = SearchOptions::with_metric(metric);
    let route = find_multi_stop_path(ctx, &stops, &options).await?;

    // Coordinates come from the search itself; path tiles may be evicted by now
    let path = route
        .coordinates
        .iter()
        .map(|&(lat, lng)| LatLng::new(lat, lng))
        .collect();

    Ok(RouteResponse { path })
}
