//! Network definition file format: nodes, links, inflow hydrographs and
//! native time-based control rules.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::error::{MpcError, Result};
use crate::mpc::history::ControlRecord;

/// A drainage network and its simulation period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkDefinition {
    /// Human-readable network name.
    pub name: String,
    /// Simulation period and routing step.
    pub options: SimulationOptions,
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub links: Vec<LinkDef>,
    /// External inflow hydrographs.
    #[serde(default)]
    pub inflows: Vec<Inflow>,
    /// Native time-based control rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controls: Vec<ControlRule>,
}

/// Simulation period and routing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationOptions {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Internal routing sub-step (s); one control interval spans several.
    pub routing_step_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Junction,
    Storage,
    Outfall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeDef {
    pub id: String,
    pub kind: NodeKind,
    /// Invert elevation (m).
    #[serde(default)]
    pub invert: f64,
    /// Depth above which inflow is lost as flooding (m).
    #[serde(default)]
    pub max_depth: f64,
    /// Plan area used for the volume balance (m²).
    #[serde(default = "default_node_area")]
    pub area: f64,
    #[serde(default)]
    pub initial_depth: f64,
}

fn default_node_area() -> f64 {
    10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Gated opening; the only controllable link kind.
    Orifice,
    Conduit,
}

impl LinkKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Orifice => "ORIFICE",
            Self::Conduit => "CONDUIT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkDef {
    pub id: String,
    pub kind: LinkKind,
    pub from: String,
    pub to: String,
    /// Discharge coefficient.
    pub coefficient: f64,
    /// Fully open flow area (m²).
    pub area: f64,
    /// Optional flow capacity (m³/s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_flow: Option<f64>,
}

/// External inflow hydrograph at one node, linearly interpolated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Inflow {
    pub node: String,
    pub points: Vec<InflowPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InflowPoint {
    pub time: NaiveDateTime,
    /// Inflow rate (m³/s).
    pub flow: f64,
}

impl Inflow {
    /// Inflow rate at `time`; zero outside the hydrograph.
    pub fn flow_at(&self, time: NaiveDateTime) -> f64 {
        let Some(first) = self.points.first() else {
            return 0.0;
        };
        if time < first.time {
            return 0.0;
        }
        for pair in self.points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if time >= a.time && time <= b.time {
                let span = (b.time - a.time).num_milliseconds() as f64;
                if span <= 0.0 {
                    return b.flow;
                }
                let frac = (time - a.time).num_milliseconds() as f64 / span;
                return a.flow + frac * (b.flow - a.flow);
            }
        }
        match self.points.last() {
            Some(last) if time == last.time => last.flow,
            _ => 0.0,
        }
    }
}

/// Native rule: from `time` on, `link` runs at `setting`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlRule {
    pub link: String,
    pub time: NaiveDateTime,
    pub setting: f64,
}

impl NetworkDefinition {
    /// Parses a network from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("network", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a network from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("network", e.to_string()))
    }

    /// Serializes the network back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validates topology and parameters and returns a list of errors.
    ///
    /// Returns an empty vector if the network is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let o = &self.options;

        if o.end <= o.start {
            errors.push(ConfigError::new("options.end", "must be after options.start"));
        }
        if !(o.routing_step_seconds > 0.0) {
            errors.push(ConfigError::new(
                "options.routing_step_seconds",
                "must be > 0",
            ));
        }

        let mut node_ids = HashSet::new();
        for (i, n) in self.nodes.iter().enumerate() {
            if !node_ids.insert(n.id.as_str()) {
                errors.push(ConfigError::new(
                    format!("nodes[{i}].id"),
                    format!("duplicate node \"{}\"", n.id),
                ));
            }
            if !(n.area > 0.0) {
                errors.push(ConfigError::new(format!("nodes[{i}].area"), "must be > 0"));
            }
            if n.kind != NodeKind::Outfall {
                if !(n.max_depth > 0.0) {
                    errors.push(ConfigError::new(
                        format!("nodes[{i}].max_depth"),
                        "must be > 0",
                    ));
                }
                if !(0.0..=n.max_depth).contains(&n.initial_depth) {
                    errors.push(ConfigError::new(
                        format!("nodes[{i}].initial_depth"),
                        "must be in [0, max_depth]",
                    ));
                }
            }
        }
        if self.nodes.is_empty() {
            errors.push(ConfigError::new("nodes", "at least one node is required"));
        }

        let mut link_ids = HashSet::new();
        for (i, l) in self.links.iter().enumerate() {
            if !link_ids.insert(l.id.as_str()) {
                errors.push(ConfigError::new(
                    format!("links[{i}].id"),
                    format!("duplicate link \"{}\"", l.id),
                ));
            }
            for (end, node) in [("from", &l.from), ("to", &l.to)] {
                if !node_ids.contains(node.as_str()) {
                    errors.push(ConfigError::new(
                        format!("links[{i}].{end}"),
                        format!("unknown node \"{node}\""),
                    ));
                }
            }
            if l.from == l.to {
                errors.push(ConfigError::new(
                    format!("links[{i}].to"),
                    "must differ from links.from",
                ));
            }
            if !(l.coefficient > 0.0) || !(l.area > 0.0) {
                errors.push(ConfigError::new(
                    format!("links[{i}]"),
                    "coefficient and area must be > 0",
                ));
            }
            if let Some(cap) = l.max_flow {
                if !(cap >= 0.0) {
                    errors.push(ConfigError::new(
                        format!("links[{i}].max_flow"),
                        "must be >= 0",
                    ));
                }
            }
        }

        for (i, inflow) in self.inflows.iter().enumerate() {
            if !node_ids.contains(inflow.node.as_str()) {
                errors.push(ConfigError::new(
                    format!("inflows[{i}].node"),
                    format!("unknown node \"{}\"", inflow.node),
                ));
            }
            if inflow.points.windows(2).any(|w| w[1].time < w[0].time) {
                errors.push(ConfigError::new(
                    format!("inflows[{i}].points"),
                    "times must be non-decreasing",
                ));
            }
            if inflow.points.iter().any(|p| !(p.flow >= 0.0) || !p.flow.is_finite()) {
                errors.push(ConfigError::new(
                    format!("inflows[{i}].points"),
                    "flows must be finite and >= 0",
                ));
            }
        }

        for (i, rule) in self.controls.iter().enumerate() {
            match self.links.iter().find(|l| l.id == rule.link) {
                None => errors.push(ConfigError::new(
                    format!("controls[{i}].link"),
                    format!("unknown link \"{}\"", rule.link),
                )),
                Some(l) if l.kind != LinkKind::Orifice => errors.push(ConfigError::new(
                    format!("controls[{i}].link"),
                    format!("link \"{}\" is not controllable", rule.link),
                )),
                Some(_) => {}
            }
            if !(0.0..=1.0).contains(&rule.setting) {
                errors.push(ConfigError::new(
                    format!("controls[{i}].setting"),
                    "must be in [0.0, 1.0]",
                ));
            }
        }

        errors
    }

    /// Validates and converts the error list into a single `MpcError`.
    pub fn check(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MpcError::Config(errors))
        }
    }

    /// Returns a copy whose native control rules replay `records`.
    ///
    /// `link_ids` are the native ids in the same order as each record's settings.
    /// Consecutive identical settings are collapsed into one rule.
    pub fn with_control_records(&self, link_ids: &[String], records: &[ControlRecord]) -> Self {
        let mut controlled = self.clone();
        controlled.controls.clear();
        for (k, link) in link_ids.iter().enumerate() {
            let mut last: Option<f64> = None;
            for record in records {
                let Some(&setting) = record.settings.get(k) else {
                    continue;
                };
                if last == Some(setting) {
                    continue;
                }
                controlled.controls.push(ControlRule {
                    link: link.clone(),
                    time: record.time,
                    setting,
                });
                last = Some(setting);
            }
        }
        controlled
            .controls
            .sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.link.cmp(&b.link)));
        controlled
    }

    /// Hash of the topology (node and link ids, kinds, connectivity).
    ///
    /// Snapshots carry it so that a handle cannot be restored onto a different network.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.name.hash(&mut hasher);
        for n in &self.nodes {
            n.id.hash(&mut hasher);
            n.kind.hash(&mut hasher);
        }
        for l in &self.links {
            l.id.hash(&mut hasher);
            l.kind.hash(&mut hasher);
            l.from.hash(&mut hasher);
            l.to.hash(&mut hasher);
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    const NETWORK: &str = r#"
name = "tiny"

[options]
start = "2024-06-01T00:00:00"
end = "2024-06-01T02:00:00"
routing_step_seconds = 30.0

[[nodes]]
id = "St1"
kind = "storage"
invert = 2.0
max_depth = 3.0
area = 2000.0
initial_depth = 0.5

[[nodes]]
id = "Out1"
kind = "outfall"

[[links]]
id = "R1"
kind = "orifice"
from = "St1"
to = "Out1"
coefficient = 0.65
area = 0.5

[[inflows]]
node = "St1"
points = [
    { time = "2024-06-01T00:00:00", flow = 0.0 },
    { time = "2024-06-01T01:00:00", flow = 2.0 },
    { time = "2024-06-01T02:00:00", flow = 0.0 },
]

[[controls]]
link = "R1"
time = "2024-06-01T00:30:00"
setting = 0.2
"#;

    fn network() -> NetworkDefinition {
        NetworkDefinition::from_toml_str(NETWORK).expect("network should parse")
    }

    #[test]
    fn toml_network_parses_and_validates() {
        let net = network();
        assert_eq!(net.nodes.len(), 2);
        assert_eq!(net.links[0].kind, LinkKind::Orifice);
        assert_eq!(net.controls.len(), 1);
        let errors = net.validate();
        assert!(errors.is_empty(), "network should be valid: {errors:?}");
    }

    #[test]
    fn unknown_field_is_rejected() {
        let bad = NETWORK.replace("coefficient = 0.65", "coefficient = 0.65\nroughness = 1");
        assert!(NetworkDefinition::from_toml_str(&bad).is_err());
    }

    #[test]
    fn hydrograph_interpolates_and_is_zero_outside() {
        let net = network();
        let inflow = &net.inflows[0];
        let start = net.options.start;
        assert_eq!(inflow.flow_at(start - TimeDelta::minutes(1)), 0.0);
        assert!((inflow.flow_at(start + TimeDelta::minutes(30)) - 1.0).abs() < 1e-9);
        assert_eq!(inflow.flow_at(start + TimeDelta::hours(1)), 2.0);
        assert_eq!(inflow.flow_at(start + TimeDelta::hours(3)), 0.0);
    }

    #[test]
    fn validation_catches_dangling_link() {
        let mut net = network();
        net.links[0].to = "Nowhere".to_string();
        let errors = net.validate();
        assert!(errors.iter().any(|e| e.field == "links[0].to"));
    }

    #[test]
    fn validation_catches_reversed_period() {
        let mut net = network();
        net.options.end = net.options.start;
        let errors = net.validate();
        assert!(errors.iter().any(|e| e.field == "options.end"));
    }

    #[test]
    fn validation_catches_rule_on_conduit() {
        let mut net = network();
        net.links[0].kind = LinkKind::Conduit;
        let errors = net.validate();
        assert!(errors.iter().any(|e| e.field == "controls[0].link"));
    }

    #[test]
    fn control_records_become_collapsed_rules() {
        let net = network();
        let t = net.options.start;
        let records = vec![
            ControlRecord {
                time: t,
                settings: vec![1.0],
            },
            ControlRecord {
                time: t + TimeDelta::minutes(15),
                settings: vec![0.4],
            },
            ControlRecord {
                time: t + TimeDelta::minutes(30),
                settings: vec![0.4],
            },
            ControlRecord {
                time: t + TimeDelta::minutes(45),
                settings: vec![0.0],
            },
        ];
        let controlled = net.with_control_records(&["R1".to_string()], &records);
        let settings: Vec<f64> = controlled.controls.iter().map(|r| r.setting).collect();
        assert_eq!(settings, vec![1.0, 0.4, 0.0]);
        assert!(controlled.validate().is_empty());
        // input left untouched
        assert_eq!(net.controls.len(), 1);
    }

    #[test]
    fn serialized_network_parses_back() {
        let net = network();
        let text = net.to_toml_string().expect("serialization should succeed");
        let back = NetworkDefinition::from_toml_str(&text).expect("round trip should parse");
        assert_eq!(back, net);
    }

    #[test]
    fn fingerprint_tracks_topology_only() {
        let net = network();
        let mut retuned = net.clone();
        retuned.links[0].coefficient = 0.9;
        assert_eq!(net.fingerprint(), retuned.fingerprint());

        let mut rewired = net.clone();
        rewired.links[0].id = "R9".to_string();
        assert_ne!(net.fingerprint(), rewired.fingerprint());
    }
}
