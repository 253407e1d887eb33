//! Scoring of candidate policies over the prediction horizon.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::CostConfig;
use crate::error::{MpcError, Result};
use crate::sim::Simulator;

use super::optimizer::CostFunction;
use super::policy::PolicyEncoder;

/// Desired end-of-horizon depth of a node and the weight of missing it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthTarget {
    /// Target depth (m).
    pub target: f64,
    /// Multiplier on the deviation from `target`.
    pub weight: f64,
}

/// Immutable cost weights for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct CostWeights {
    pub flood_weight: f64,
    pub deviation_weight: f64,
    pub flood_exponent: f64,
    /// `None` weighs every node 1.0; otherwise unlisted nodes weigh 0.
    pub flood_weight_by_node: Option<BTreeMap<String, f64>>,
    pub targets: BTreeMap<String, DepthTarget>,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self::from(&CostConfig::default())
    }
}

impl From<&CostConfig> for CostWeights {
    fn from(cfg: &CostConfig) -> Self {
        Self {
            flood_weight: cfg.flood_weight,
            deviation_weight: cfg.deviation_weight,
            flood_exponent: cfg.flood_exponent,
            flood_weight_by_node: cfg.flood_weight_by_node.clone(),
            targets: cfg.target_depth_by_node.clone(),
        }
    }
}

impl CostWeights {
    /// Flood weight of `node`.
    pub fn node_flood_weight(&self, node: &str) -> f64 {
        match &self.flood_weight_by_node {
            None => 1.0,
            Some(map) => map.get(node).copied().unwrap_or(0.0),
        }
    }

    /// Every node the weights refer to by name.
    pub fn referenced_nodes(&self) -> impl Iterator<Item = &str> {
        self.targets
            .keys()
            .chain(self.flood_weight_by_node.iter().flat_map(|m| m.keys()))
            .map(String::as_str)
    }
}

/// What a horizon simulation produced, as far as the cost is concerned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HorizonOutcome {
    /// Flood volume accrued per node over the horizon (m³).
    pub flood_by_node: BTreeMap<String, f64>,
    /// Depth per node at the end of the horizon (m).
    pub final_depths: BTreeMap<String, f64>,
}

/// Cost of a horizon outcome.
///
/// `flood_weight · Σ w_f(n) · flood(n)^p + deviation_weight · Σ w_d(n) · (depth(n) − target(n))`
///
/// The deviation term is signed: ending below target lowers the cost, so the
/// search is biased toward drawing storage down rather than merely hitting
/// the target.
///
/// # Errors
///
/// `MpcError::Evaluation` if a target node is missing from the outcome or the
/// cost is not finite.
pub fn policy_cost(outcome: &HorizonOutcome, weights: &CostWeights) -> Result<f64> {
    let flood: f64 = outcome
        .flood_by_node
        .iter()
        .map(|(node, &v)| {
            weights.node_flood_weight(node) * v.max(0.0).powf(weights.flood_exponent)
        })
        .sum();

    let mut deviation = 0.0;
    for (node, t) in &weights.targets {
        let depth = outcome.final_depths.get(node).ok_or_else(|| {
            MpcError::Evaluation(format!("target node \"{node}\" has no depth reading"))
        })?;
        deviation += t.weight * (depth - t.target);
    }

    let cost = weights.flood_weight * flood + weights.deviation_weight * deviation;
    if cost.is_finite() {
        Ok(cost)
    } else {
        Err(MpcError::Evaluation(format!("non-finite cost {cost}")))
    }
}

fn as_evaluation(err: MpcError) -> MpcError {
    match err {
        MpcError::Evaluation(_) => err,
        other => MpcError::Evaluation(other.to_string()),
    }
}

/// Simulates a candidate over the horizon on a private simulator and scores it.
pub struct CostEvaluator<'a, S: Simulator> {
    prototype: &'a S,
    encoder: PolicyEncoder,
}

impl<S: Simulator> Clone for CostEvaluator<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: Simulator> Copy for CostEvaluator<'_, S> {}

impl<'a, S: Simulator> CostEvaluator<'a, S> {
    /// `prototype` only supplies the network for restores and is never mutated.
    pub fn new(prototype: &'a S, encoder: PolicyEncoder) -> Self {
        Self { prototype, encoder }
    }

    /// Runs the candidate from `snapshot` for up to `horizon_steps` intervals.
    ///
    /// `structure_ids` are native ids in chromosome order.
    ///
    /// # Errors
    ///
    /// `MpcError::Shape` if the chromosome does not fit the horizon; every
    /// failure inside the horizon simulation as `MpcError::Evaluation`.
    pub fn evaluate(
        &self,
        chromosome: &[u8],
        snapshot: &S::Snapshot,
        structure_ids: &[String],
        horizon_steps: usize,
        weights: &CostWeights,
    ) -> Result<f64> {
        let policy = self
            .encoder
            .decode(chromosome, structure_ids, horizon_steps)?;
        let mut sim = self.prototype.restore_from(snapshot).map_err(as_evaluation)?;
        let before = sim.current_state();

        for step in 0..policy.steps() {
            let Some(settings) = policy.settings_at(step) else {
                break;
            };
            for (id, &fraction) in structure_ids.iter().zip(&settings) {
                sim.set_control(id, fraction).map_err(as_evaluation)?;
            }
            if sim.advance().map_err(as_evaluation)? {
                break;
            }
        }

        let after = sim.current_state();
        let outcome = HorizonOutcome {
            flood_by_node: after
                .node_flood_volumes
                .iter()
                .map(|(node, &v)| {
                    let accrued = v - before.flood_volume(node).unwrap_or(0.0);
                    (node.clone(), accrued)
                })
                .collect(),
            final_depths: after.node_depths,
        };
        policy_cost(&outcome, weights)
    }
}

/// One tick's objective: the evaluator bound to a snapshot, ids, horizon and weights.
pub struct HorizonObjective<'a, S: Simulator> {
    pub evaluator: CostEvaluator<'a, S>,
    pub snapshot: &'a S::Snapshot,
    pub structure_ids: &'a [String],
    pub horizon_steps: usize,
    pub weights: &'a CostWeights,
}

impl<S: Simulator> CostFunction for HorizonObjective<'_, S> {
    fn cost(&self, genes: &[u8]) -> Result<f64> {
        self.evaluator.evaluate(
            genes,
            self.snapshot,
            self.structure_ids,
            self.horizon_steps,
            self.weights,
        )
    }
}
