//! Built-in scenarios: a network definition paired with an MPC configuration.
//!
//! Both presets model two upstream storage units draining through gated
//! orifices into a junction whose outlet conduit is undersized, so opening
//! every gate at the storm peak floods the junction while keeping them shut
//! floods the storage units.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

use crate::config::{ConfigError, MpcConfig};
use crate::mpc::cost::DepthTarget;
use crate::network::definition::{
    Inflow, InflowPoint, LinkDef, LinkKind, NetworkDefinition, NodeDef, NodeKind,
    SimulationOptions,
};

/// A runnable MPC scenario.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub config: MpcConfig,
    pub network: NetworkDefinition,
}

impl Scenario {
    /// Available preset names.
    pub const PRESETS: &[&str] = &["simple_1_ctl", "simple_2_ctl"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "simple_1_ctl" => Ok(Self {
                config: simple_config(&["ORIFICE R1"]),
                network: simple_1_ctl_network(),
            }),
            "simple_2_ctl" => Ok(Self {
                config: simple_config(&["ORIFICE R1", "ORIFICE R2"]),
                network: simple_2_ctl_network(),
            }),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Loads a scenario from a run configuration file and a network file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if either file cannot be read or parsed.
    pub fn from_files(config: &Path, network: &Path) -> Result<Self, ConfigError> {
        Ok(Self {
            config: MpcConfig::from_toml_file(config)?,
            network: NetworkDefinition::from_toml_file(network)?,
        })
    }

    /// Validates the configuration and the network together.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = self.config.validate();
        errors.extend(self.network.validate());
        errors
    }
}

fn simple_config(structure_ids: &[&str]) -> MpcConfig {
    let mut cfg = MpcConfig::default();
    cfg.control.horizon_hours = 1.0;
    cfg.control.time_step_seconds = 900.0;
    cfg.control.structure_ids = structure_ids.iter().map(|s| s.to_string()).collect();
    cfg.cost.target_depth_by_node.insert(
        "St1".to_string(),
        DepthTarget {
            target: 1.0,
            weight: 0.1,
        },
    );
    cfg.optimizer.generations = 7;
    cfg.optimizer.population_size = 50;
    cfg
}

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Triangular storm hydrograph rising from zero at the start.
fn storm(node: &str, peak_flow: f64, peak_after: TimeDelta, duration: TimeDelta) -> Inflow {
    let t0 = start();
    Inflow {
        node: node.to_string(),
        points: vec![
            InflowPoint {
                time: t0,
                flow: 0.0,
            },
            InflowPoint {
                time: t0 + peak_after,
                flow: peak_flow,
            },
            InflowPoint {
                time: t0 + duration,
                flow: 0.0,
            },
        ],
    }
}

fn storage(id: &str, area: f64) -> NodeDef {
    NodeDef {
        id: id.to_string(),
        kind: NodeKind::Storage,
        invert: 2.0,
        max_depth: 3.0,
        area,
        initial_depth: 0.5,
    }
}

fn orifice(id: &str, from: &str) -> LinkDef {
    LinkDef {
        id: id.to_string(),
        kind: LinkKind::Orifice,
        from: from.to_string(),
        to: "J3".to_string(),
        coefficient: 0.65,
        area: 0.4,
        max_flow: None,
    }
}

fn downstream(
    mut nodes: Vec<NodeDef>,
    mut links: Vec<LinkDef>,
    inflows: Vec<Inflow>,
    name: &str,
) -> NetworkDefinition {
    nodes.push(NodeDef {
        id: "J3".to_string(),
        kind: NodeKind::Junction,
        invert: 0.5,
        max_depth: 1.5,
        area: 50.0,
        initial_depth: 0.0,
    });
    nodes.push(NodeDef {
        id: "Out1".to_string(),
        kind: NodeKind::Outfall,
        invert: 0.0,
        max_depth: 0.0,
        area: 10.0,
        initial_depth: 0.0,
    });
    links.push(LinkDef {
        id: "C3".to_string(),
        kind: LinkKind::Conduit,
        from: "J3".to_string(),
        to: "Out1".to_string(),
        coefficient: 0.8,
        area: 0.8,
        max_flow: Some(1.5),
    });
    let t0 = start();
    NetworkDefinition {
        name: name.to_string(),
        options: SimulationOptions {
            start: t0,
            end: t0 + TimeDelta::hours(6),
            routing_step_seconds: 30.0,
        },
        nodes,
        links,
        inflows,
        controls: Vec::new(),
    }
}

/// One gated storage unit upstream of the junction.
pub fn simple_1_ctl_network() -> NetworkDefinition {
    downstream(
        vec![storage("St1", 2000.0)],
        vec![orifice("R1", "St1")],
        vec![storm("St1", 2.5, TimeDelta::hours(1), TimeDelta::hours(3))],
        "simple_1_ctl",
    )
}

/// Two gated storage units sharing one undersized junction outlet.
pub fn simple_2_ctl_network() -> NetworkDefinition {
    downstream(
        vec![storage("St1", 2000.0), storage("St2", 1500.0)],
        vec![orifice("R1", "St1"), orifice("R2", "St2")],
        vec![
            storm("St1", 2.5, TimeDelta::hours(1), TimeDelta::hours(3)),
            storm("St2", 1.8, TimeDelta::minutes(90), TimeDelta::hours(4)),
        ],
        "simple_2_ctl",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_preset_unknown() {
        let err = Scenario::from_preset("nonexistent");
        assert!(err.is_err());
        assert!(
            err.err()
                .map(|e| e.message.contains("unknown preset"))
                .unwrap_or(false)
        );
    }

    #[test]
    fn all_presets_are_valid() {
        for name in Scenario::PRESETS {
            let scenario = Scenario::from_preset(name);
            assert!(scenario.is_ok(), "preset \"{name}\" should load");
            let scenario = scenario.ok();
            let config_errors = scenario
                .as_ref()
                .map(|s| s.config.validate())
                .unwrap_or_default();
            assert!(
                config_errors.is_empty(),
                "preset \"{name}\" config should be valid: {config_errors:?}"
            );
            let network_errors = scenario
                .as_ref()
                .map(|s| s.network.validate())
                .unwrap_or_default();
            assert!(
                network_errors.is_empty(),
                "preset \"{name}\" network should be valid: {network_errors:?}"
            );
        }
    }

    #[test]
    fn presets_control_one_structure_per_storage_unit() {
        let one = Scenario::from_preset("simple_1_ctl").ok();
        let two = Scenario::from_preset("simple_2_ctl").ok();
        assert_eq!(one.map(|s| s.config.control.structure_ids.len()), Some(1));
        assert_eq!(two.map(|s| s.config.control.structure_ids.len()), Some(2));
    }

    #[test]
    fn presets_have_no_native_controls() {
        assert!(simple_1_ctl_network().controls.is_empty());
        assert!(simple_2_ctl_network().controls.is_empty());
    }
}
