//! Distance helpers and the search distance metric

use geo::HaversineDistance;
use geo::Point;
use log::warn;

use crate::core::error::suggest_correction;
use crate::core::tile::Node;

/// Great-circle distance in meters
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let p1 = Point::new(lon1, lat1);
    let p2 = Point::new(lon2, lat2);
    p1.haversine_distance(&p2)
}

/// Straight-line distance on raw coordinates (degrees)
pub fn euclidean_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = lat2 - lat1;
    let d_lon = lon2 - lon1;
    (d_lat * d_lat + d_lon * d_lon).sqrt()
}

/// Heuristic distance used by the search
///
/// `Euclidean` works on raw degrees and is cheap; `Haversine` models Earth
/// curvature and should be used once routes span tens of kilometers.
#[derive(Debug, Clone, Copy, Default)]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Haversine,
    Custom(fn(&Node, &Node) -> f64),
}

const METRIC_NAMES: [&str; 2] = ["euclidean", "haversine"];

impl DistanceMetric {
    pub fn distance(&self, a: &Node, b: &Node) -> f64 {
        match self {
            DistanceMetric::Euclidean => euclidean_distance(a.lat, a.lon, b.lat, b.lon),
            DistanceMetric::Haversine => haversine_distance(a.lat, a.lon, b.lat, b.lon),
            DistanceMetric::Custom(f) => f(a, b),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Haversine => "haversine",
            DistanceMetric::Custom(_) => "custom",
        }
    }

    /// Parse a metric name; unknown or missing names fall back to the default
    pub fn from_name(name: Option<&str>) -> Self {
        let Some(name) = name else {
            return Self::default();
        };

        match name.trim().to_lowercase().as_str() {
            "euclidean" => DistanceMetric::Euclidean,
            "haversine" => DistanceMetric::Haversine,
            _ => {
                let fallback = Self::default();
                match suggest_correction(name, &METRIC_NAMES) {
                    Some(suggestion) => warn!(
                        "Unknown distance metric '{name}' (did you mean '{suggestion}'?), using {}",
                        fallback.name()
                    ),
                    None => warn!("Unknown distance metric '{name}', using {}", fallback.name()),
                }
                fallback
            }
        }
    }
}
