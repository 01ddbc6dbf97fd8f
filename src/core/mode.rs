//! Fetch-detail mode controller
//!
//! Picks how much road detail the loader requests per tile. Long routes start
//! coarse; the mode coarsens further when the search struggles and refines
//! again once the search is stable and close to the goal.

use std::fmt;

use log::info;
use serde::{Deserialize, Serialize};

/// Level of road detail requested from the tile source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Major roads only
    Backbone,
    /// Medium detail
    Express,
    /// Full local street detail
    Detailed,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Backbone => "backbone",
            FetchMode::Express => "express",
            FetchMode::Detailed => "detailed",
        }
    }

    /// One level less detailed, if any
    pub fn coarser(&self) -> Option<FetchMode> {
        match self {
            FetchMode::Detailed => Some(FetchMode::Express),
            FetchMode::Express => Some(FetchMode::Backbone),
            FetchMode::Backbone => None,
        }
    }

    /// One level more detailed, if any
    pub fn finer(&self) -> Option<FetchMode> {
        match self {
            FetchMode::Backbone => Some(FetchMode::Express),
            FetchMode::Express => Some(FetchMode::Detailed),
            FetchMode::Detailed => None,
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds of the switching policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeThresholds {
    /// Straight-line distance at or above which the search starts in backbone mode
    pub backbone_min_km: f64,
    /// Straight-line distance at or above which the search starts in express mode
    pub express_min_km: f64,
    pub low_exploration_rate: f64,
    pub low_exploration_after: usize,
    pub early_stall_iterations: usize,
    pub early_stall_progress_pct: f64,
    pub late_stall_iterations: usize,
    pub late_stall_progress_pct: f64,
    /// Stall events tolerated before coarsening
    pub max_stall_events: u32,
    /// Consecutive stable checks required before refining
    pub stable_checks_to_refine: u32,
}

impl Default for ModeThresholds {
    fn default() -> Self {
        Self {
            backbone_min_km: 150.0,
            express_min_km: 50.0,
            low_exploration_rate: 0.2,
            low_exploration_after: 2_500,
            early_stall_iterations: 50_000,
            early_stall_progress_pct: 15.0,
            late_stall_iterations: 250_000,
            late_stall_progress_pct: 40.0,
            max_stall_events: 3,
            stable_checks_to_refine: 2,
        }
    }
}

/// Search state sampled at a periodic check
#[derive(Debug, Clone, Default)]
pub struct SearchSignals {
    pub distance_to_goal_m: f64,
    pub stall_count: u32,
    pub progress_pct: f64,
    pub tiles_loaded: usize,
    pub frontier_size: usize,
    pub iterations: usize,
    pub explored_nodes: usize,
}

/// Per-search mode state machine
#[derive(Debug, Clone)]
pub struct ModeController {
    mode: FetchMode,
    thresholds: ModeThresholds,
    stable_checks: u32,
    switches: u32,
}

impl ModeController {
    /// Controller whose initial mode matches the straight-line route length
    pub fn for_distance(distance_m: f64, thresholds: ModeThresholds) -> Self {
        let mode = mode_for_distance(distance_m, &thresholds);
        Self {
            mode,
            thresholds,
            stable_checks: 0,
            switches: 0,
        }
    }

    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    pub fn switches(&self) -> u32 {
        self.switches
    }

    /// Whether the sampled state shows the search struggling
    fn is_stressed(&self, s: &SearchSignals) -> bool {
        let t = &self.thresholds;

        let low_exploration = s.iterations >= t.low_exploration_after
            && (s.explored_nodes as f64 / s.iterations as f64) < t.low_exploration_rate;
        let early_stall =
            s.iterations >= t.early_stall_iterations && s.progress_pct < t.early_stall_progress_pct;
        let late_stall =
            s.iterations >= t.late_stall_iterations && s.progress_pct < t.late_stall_progress_pct;
        let stalled = s.stall_count >= t.max_stall_events;

        low_exploration || early_stall || late_stall || stalled
    }

    /// Evaluate the policy; returns the new mode when a switch happened
    ///
    /// Tiles already resident keep the detail they were fetched with, so the
    /// caller must re-fetch the current tile when this returns `Some`.
    pub fn maybe_switch(&mut self, signals: &SearchSignals) -> Option<FetchMode> {
        let next = if self.is_stressed(signals) {
            self.stable_checks = 0;
            self.mode.coarser()
        } else {
            self.stable_checks += 1;
            let wanted = mode_for_distance(signals.distance_to_goal_m, &self.thresholds);
            if wanted > self.mode && self.stable_checks >= self.thresholds.stable_checks_to_refine {
                self.mode.finer()
            } else {
                None
            }
        }?;

        info!(
            "Switching fetch mode {} -> {} (iterations: {}, progress: {:.1}%, stalls: {}, frontier: {}, tiles: {})",
            self.mode,
            next,
            signals.iterations,
            signals.progress_pct,
            signals.stall_count,
            signals.frontier_size,
            signals.tiles_loaded
        );
        self.mode = next;
        self.stable_checks = 0;
        self.switches += 1;
        Some(next)
    }
}

/// Initial mode for a straight-line distance in meters
pub fn mode_for_distance(distance_m: f64, thresholds: &ModeThresholds) -> FetchMode {
    let km = distance_m / 1000.0;
    if km >= thresholds.backbone_min_km {
        FetchMode::Backbone
    } else if km >= thresholds.express_min_km {
        FetchMode::Express
    } else {
        FetchMode::Detailed
    }
}
