//! Point-in-time readings of the hydraulic network.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;

/// Readings of the network at one simulated instant.
///
/// Captured once per control tick and never mutated afterwards. The
/// restorable engine state for the same instant is the simulator's
/// associated `Snapshot` type, captured separately.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    /// Simulated timestamp of the readings.
    pub time: NaiveDateTime,
    /// Water depth above invert per node (m).
    pub node_depths: BTreeMap<String, f64>,
    /// Flow per link (m³/s, positive from upstream to downstream node).
    pub link_flows: BTreeMap<String, f64>,
    /// Flood volume per node accumulated since the simulation started (m³).
    pub node_flood_volumes: BTreeMap<String, f64>,
}

impl SimulationState {
    /// Depth of `node`, if it exists.
    pub fn depth(&self, node: &str) -> Option<f64> {
        self.node_depths.get(node).copied()
    }

    /// Flow of `link`, if it exists.
    pub fn flow(&self, link: &str) -> Option<f64> {
        self.link_flows.get(link).copied()
    }

    /// Cumulative flood volume of `node`, if it exists.
    pub fn flood_volume(&self, node: &str) -> Option<f64> {
        self.node_flood_volumes.get(node).copied()
    }

    /// Cumulative flood volume summed over all nodes (m³).
    pub fn total_flood_volume(&self) -> f64 {
        self.node_flood_volumes.values().sum()
    }
}

impl fmt::Display for SimulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} |", self.time.format("%Y-%m-%d %H:%M"))?;
        for (node, depth) in &self.node_depths {
            write!(f, " {node}={depth:.3}m")?;
        }
        write!(f, " | flooded={:.1}m3", self.total_flood_volume())
    }
}
