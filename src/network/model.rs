//! Lumped storage-routing model implementing [`Simulator`].
//!
//! Each node is a prismatic reservoir (plan area × depth). Link flows follow
//! the orifice equation on the head difference between their end nodes:
//!
//! * orifice: `Q = Cd · A · s · sqrt(2 g Δh)` with gate setting `s`
//! * conduit: `Q = Cd · A · sqrt(2 g Δh)`, capped at `max_flow`
//!
//! Volumes are integrated with an explicit step of `routing_step_seconds`;
//! outflows are scaled down so no node drains below empty, and any volume
//! above a node's maximum depth is lost as flooding. Outfalls are free
//! boundaries held at zero depth.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{NaiveDateTime, TimeDelta};

use crate::error::{MpcError, Result};
use crate::sim::adapter::{Simulator, check_fraction};
use crate::sim::clock::ControlClock;
use crate::sim::types::SimulationState;

use super::definition::{LinkKind, NetworkDefinition, NodeKind};

const GRAVITY: f64 = 9.81;

/// Immutable network data shared by the live model and every restored copy.
#[derive(Debug)]
struct Topology {
    definition: NetworkDefinition,
    fingerprint: u64,
    link_index: HashMap<String, usize>,
    /// `(from, to)` node indices per link.
    link_ends: Vec<(usize, usize)>,
    /// Inflow hydrographs resolved to node indices.
    inflow_nodes: Vec<usize>,
    routing_step: TimeDelta,
}

/// Native rule resolved to a link index, sorted by time.
#[derive(Debug, Clone, Copy)]
struct ResolvedRule {
    time: NaiveDateTime,
    link: usize,
    setting: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct HydraulicState {
    depths: Vec<f64>,
    flood_volumes: Vec<f64>,
    link_flows: Vec<f64>,
    settings: Vec<f64>,
    /// Index of the next native rule to apply.
    rule_cursor: usize,
}

/// Hotstart handle for [`LumpedNetwork`].
#[derive(Debug, Clone)]
pub struct NetworkSnapshot {
    fingerprint: u64,
    time: NaiveDateTime,
    state: HydraulicState,
    rules: Arc<[ResolvedRule]>,
}

impl NetworkSnapshot {
    /// Simulated instant at which the snapshot was taken.
    pub fn time(&self) -> NaiveDateTime {
        self.time
    }
}

/// Lumped storage-routing network simulator.
#[derive(Debug, Clone)]
pub struct LumpedNetwork {
    topology: Arc<Topology>,
    clock: ControlClock,
    state: HydraulicState,
    rules: Arc<[ResolvedRule]>,
}

impl LumpedNetwork {
    /// Builds a simulator positioned at the network's start time.
    ///
    /// # Arguments
    ///
    /// * `definition` - Validated network definition
    /// * `control_step` - Length of one control interval
    ///
    /// # Errors
    ///
    /// `MpcError::Config` if the definition is invalid, `MpcError::Validation`
    /// if `control_step` is shorter than one millisecond.
    pub fn new(definition: NetworkDefinition, control_step: TimeDelta) -> Result<Self> {
        definition.check()?;
        if control_step < TimeDelta::milliseconds(1) {
            return Err(MpcError::Validation(
                "control step must be at least 1 ms".to_string(),
            ));
        }

        let node_index: HashMap<String, usize> = definition
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        let link_index: HashMap<String, usize> = definition
            .links
            .iter()
            .enumerate()
            .map(|(i, l)| (l.id.clone(), i))
            .collect();
        let link_ends = definition
            .links
            .iter()
            .map(|l| (node_index[&l.from], node_index[&l.to]))
            .collect();
        let inflow_nodes = definition
            .inflows
            .iter()
            .map(|f| node_index[&f.node])
            .collect();

        let mut rules: Vec<ResolvedRule> = definition
            .controls
            .iter()
            .map(|r| ResolvedRule {
                time: r.time,
                link: link_index[&r.link],
                setting: r.setting,
            })
            .collect();
        rules.sort_by_key(|r| r.time);

        let routing_ms = (definition.options.routing_step_seconds * 1000.0).round() as i64;
        let routing_step = TimeDelta::milliseconds(routing_ms.max(1));

        let state = HydraulicState {
            depths: definition
                .nodes
                .iter()
                .map(|n| match n.kind {
                    NodeKind::Outfall => 0.0,
                    _ => n.initial_depth,
                })
                .collect(),
            flood_volumes: vec![0.0; definition.nodes.len()],
            link_flows: vec![0.0; definition.links.len()],
            settings: vec![1.0; definition.links.len()],
            rule_cursor: 0,
        };
        let clock = ControlClock::new(
            definition.options.start,
            definition.options.end,
            control_step,
        );
        let fingerprint = definition.fingerprint();

        Ok(Self {
            topology: Arc::new(Topology {
                definition,
                fingerprint,
                link_index,
                link_ends,
                inflow_nodes,
                routing_step,
            }),
            clock,
            state,
            rules: rules.into(),
        })
    }

    /// The definition this model was built from.
    pub fn definition(&self) -> &NetworkDefinition {
        &self.topology.definition
    }

    /// Current gate setting of `link`, if it exists.
    pub fn setting(&self, link: &str) -> Option<f64> {
        self.topology
            .link_index
            .get(link)
            .map(|&i| self.state.settings[i])
    }

    fn apply_rules(&mut self, time: NaiveDateTime) {
        while let Some(rule) = self.rules.get(self.state.rule_cursor) {
            if rule.time > time {
                break;
            }
            self.state.settings[rule.link] = rule.setting;
            self.state.rule_cursor += 1;
        }
    }

    /// One explicit routing sub-step of `dt` seconds starting at `time`.
    fn route(&mut self, time: NaiveDateTime, dt: f64) -> Result<()> {
        let topo = Arc::clone(&self.topology);
        let nodes = &topo.definition.nodes;
        let links = &topo.definition.links;

        let mut external = vec![0.0; nodes.len()];
        for (inflow, &node) in topo.definition.inflows.iter().zip(&topo.inflow_nodes) {
            external[node] += inflow.flow_at(time);
        }

        // Unconstrained link flows from the current heads.
        let mut flows = vec![0.0; links.len()];
        for (k, link) in links.iter().enumerate() {
            let (from, to) = topo.link_ends[k];
            let depth_from = self.state.depths[from];
            if depth_from <= 0.0 {
                continue;
            }
            let head_from = nodes[from].invert + depth_from;
            let head_to = nodes[to].invert + self.state.depths[to];
            let dh = (head_from - head_to).min(depth_from);
            if dh <= 0.0 {
                continue;
            }
            let q = link.coefficient * link.area * (2.0 * GRAVITY * dh).sqrt();
            flows[k] = match link.kind {
                LinkKind::Orifice => q * self.state.settings[k],
                LinkKind::Conduit => link.max_flow.map_or(q, |cap| q.min(cap)),
            };
        }

        // Scale outflows so that no node releases more than it holds.
        let mut outflow = vec![0.0; nodes.len()];
        for (k, &(from, _)) in topo.link_ends.iter().enumerate() {
            outflow[from] += flows[k];
        }
        let mut scale = vec![1.0; nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            if node.kind == NodeKind::Outfall || outflow[i] <= 0.0 {
                continue;
            }
            let available = self.state.depths[i] * node.area + external[i] * dt;
            let wanted = outflow[i] * dt;
            if wanted > available {
                scale[i] = (available / wanted).max(0.0);
            }
        }
        for (k, &(from, _)) in topo.link_ends.iter().enumerate() {
            flows[k] *= scale[from];
        }

        let mut net = external;
        for (k, &(from, to)) in topo.link_ends.iter().enumerate() {
            net[from] -= flows[k];
            net[to] += flows[k];
        }

        for (i, node) in nodes.iter().enumerate() {
            if node.kind == NodeKind::Outfall {
                self.state.depths[i] = 0.0;
                continue;
            }
            let volume = (self.state.depths[i] * node.area + net[i] * dt).max(0.0);
            let mut depth = volume / node.area;
            if depth > node.max_depth {
                self.state.flood_volumes[i] += (depth - node.max_depth) * node.area;
                depth = node.max_depth;
            }
            if !depth.is_finite() {
                return Err(MpcError::Simulation(format!(
                    "non-finite depth at node \"{}\" at {time}",
                    node.id
                )));
            }
            self.state.depths[i] = depth;
        }
        self.state.link_flows = flows;
        Ok(())
    }
}

impl Simulator for LumpedNetwork {
    type Snapshot = NetworkSnapshot;

    fn start_time(&self) -> NaiveDateTime {
        self.clock.start()
    }

    fn end_time(&self) -> NaiveDateTime {
        self.clock.end()
    }

    fn current_time(&self) -> NaiveDateTime {
        self.clock.current()
    }

    fn control_step(&self) -> TimeDelta {
        self.clock.step()
    }

    fn steps_remaining(&self) -> usize {
        self.clock.steps_remaining()
    }

    fn advance(&mut self) -> Result<bool> {
        let Some((from, to)) = self.clock.tick() else {
            return Ok(true);
        };
        let routing_step = self.topology.routing_step;
        let mut t = from;
        while t < to {
            let dt = (to - t).min(routing_step);
            self.apply_rules(t);
            self.route(t, dt.num_milliseconds() as f64 / 1000.0)?;
            t += dt;
        }
        Ok(self.clock.is_finished())
    }

    fn current_state(&self) -> SimulationState {
        let def = &self.topology.definition;
        SimulationState {
            time: self.clock.current(),
            node_depths: def
                .nodes
                .iter()
                .zip(&self.state.depths)
                .map(|(n, &d)| (n.id.clone(), d))
                .collect(),
            link_flows: def
                .links
                .iter()
                .zip(&self.state.link_flows)
                .map(|(l, &q)| (l.id.clone(), q))
                .collect(),
            node_flood_volumes: def
                .nodes
                .iter()
                .zip(&self.state.flood_volumes)
                .map(|(n, &v)| (n.id.clone(), v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn snapshot(&self) -> Result<NetworkSnapshot> {
        let s = &self.state;
        let resumable = s
            .depths
            .iter()
            .chain(&s.flood_volumes)
            .chain(&s.link_flows)
            .chain(&s.settings)
            .all(|v| v.is_finite());
        if !resumable {
            return Err(MpcError::Snapshot(format!(
                "state at {} holds non-finite values",
                self.clock.current()
            )));
        }
        Ok(NetworkSnapshot {
            fingerprint: self.topology.fingerprint,
            time: self.clock.current(),
            state: self.state.clone(),
            rules: Arc::clone(&self.rules),
        })
    }

    fn restore_from(&self, handle: &NetworkSnapshot) -> Result<Self> {
        if handle.fingerprint != self.topology.fingerprint {
            return Err(MpcError::Restore(format!(
                "snapshot does not belong to network \"{}\"",
                self.topology.definition.name
            )));
        }
        if handle.time < self.clock.start() || handle.time > self.clock.end() {
            return Err(MpcError::Restore(format!(
                "snapshot time {} is outside the simulation period",
                handle.time
            )));
        }
        Ok(Self {
            topology: Arc::clone(&self.topology),
            clock: ControlClock::resume(
                self.clock.start(),
                self.clock.end(),
                self.clock.step(),
                handle.time,
            ),
            state: handle.state.clone(),
            rules: Arc::clone(&handle.rules),
        })
    }

    fn set_control(&mut self, structure_id: &str, fraction: f64) -> Result<()> {
        check_fraction(structure_id, fraction)?;
        let link = self.resolve_structure(structure_id)?;
        let k = self.topology.link_index[&link];
        self.state.settings[k] = fraction;
        Ok(())
    }

    /// Accepts either the bare link id (`"R1"`) or `"<KIND> <id>"` (`"ORIFICE R1"`).
    fn resolve_structure(&self, structure_id: &str) -> Result<String> {
        let tokens: Vec<&str> = structure_id.split_whitespace().collect();
        let (kind, id) = match tokens.as_slice() {
            [id] => (None, *id),
            [kind, id] => (Some(*kind), *id),
            _ => {
                return Err(MpcError::Validation(format!(
                    "malformed structure id \"{structure_id}\""
                )));
            }
        };
        let link = self
            .topology
            .link_index
            .get(id)
            .map(|&k| &self.topology.definition.links[k])
            .ok_or_else(|| {
                MpcError::Validation(format!("unknown structure \"{structure_id}\""))
            })?;
        if let Some(kind) = kind {
            if !kind.eq_ignore_ascii_case(link.kind.keyword()) {
                return Err(MpcError::Validation(format!(
                    "structure \"{structure_id}\" is a {}, not a {kind}",
                    link.kind.keyword()
                )));
            }
        }
        if link.kind != LinkKind::Orifice {
            return Err(MpcError::Validation(format!(
                "structure \"{structure_id}\" is not controllable"
            )));
        }
        Ok(link.id.clone())
    }

    fn clear_control_rules(&mut self) -> usize {
        let pending = self.rules.len().saturating_sub(self.state.rule_cursor);
        self.rules = Arc::from(Vec::new());
        self.state.rule_cursor = 0;
        pending
    }
}
