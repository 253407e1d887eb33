//! TOML-based run configuration for the MPC loop.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::mpc::cost::DepthTarget;
use crate::mpc::policy::DEFAULT_GRID_MAX;

/// Top-level MPC run configuration parsed from TOML.
///
/// All sections have defaults (7 generations of 100 individuals, one-hour
/// horizon). Load from TOML with [`MpcConfig::from_toml_file`]; built-in
/// scenarios live in [`crate::presets`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MpcConfig {
    /// Horizon, control interval and controlled structures.
    #[serde(default)]
    pub control: ControlConfig,
    /// Cost function weights.
    #[serde(default)]
    pub cost: CostConfig,
    /// Genetic algorithm parameters.
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// Result file locations.
    #[serde(default)]
    pub output: OutputConfig,
}

/// What to apply when a tick produces no valid optimised policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Keep the settings applied on the previous tick.
    #[default]
    HoldPrevious,
    /// Open every controlled structure fully.
    FullyOpen,
}

/// Horizon, control interval and controlled structures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlConfig {
    /// Planning horizon in hours.
    pub horizon_hours: f64,
    /// Control interval in seconds.
    pub time_step_seconds: f64,
    /// Controlled structures, e.g. `"ORIFICE R1"` or `"R1"`.
    pub structure_ids: Vec<String>,
    /// Fallback applied when the optimiser yields no valid policy.
    pub fallback: FallbackPolicy,
    /// Optional wall-clock budget per control tick.
    pub tick_deadline_seconds: Option<f64>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            horizon_hours: 1.0,
            time_step_seconds: 300.0,
            structure_ids: Vec::new(),
            fallback: FallbackPolicy::HoldPrevious,
            tick_deadline_seconds: None,
        }
    }
}

impl ControlConfig {
    /// Number of control intervals in one planning horizon.
    pub fn horizon_steps(&self) -> usize {
        if self.time_step_seconds <= 0.0 {
            return 0;
        }
        (self.horizon_hours * 3600.0 / self.time_step_seconds).floor() as usize
    }
}

/// Cost function weights.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CostConfig {
    /// Global multiplier of the flooding term.
    pub flood_weight: f64,
    /// Global multiplier of the depth deviation term.
    pub deviation_weight: f64,
    /// Exponent applied to each node's flood volume.
    pub flood_exponent: f64,
    /// Relative flood weight per node; every node weighs 1.0 when absent.
    pub flood_weight_by_node: Option<BTreeMap<String, f64>>,
    /// Target depth and weight per node.
    pub target_depth_by_node: BTreeMap<String, DepthTarget>,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            flood_weight: 1.0,
            deviation_weight: 1.0,
            flood_exponent: 3.0,
            flood_weight_by_node: None,
            target_depth_by_node: BTreeMap::new(),
        }
    }
}

/// Genetic algorithm parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    /// Number of generations per tick.
    pub generations: usize,
    /// Individuals per generation.
    pub population_size: usize,
    /// Probability that a pair of offspring is recombined.
    pub crossover_probability: f64,
    /// Probability that an offspring enters mutation.
    pub mutation_probability: f64,
    /// Per-gene resampling probability inside mutation.
    pub gene_mutation_probability: f64,
    /// Tournament size for parent selection.
    pub tournament_size: usize,
    /// Highest setting level; gene `v` means fraction `v / grid_max`.
    pub grid_max: u8,
    /// Master random seed.
    pub seed: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            generations: 7,
            population_size: 100,
            crossover_probability: 0.5,
            mutation_probability: 0.2,
            gene_mutation_probability: 0.1,
            tournament_size: 6,
            grid_max: DEFAULT_GRID_MAX,
            seed: 42,
        }
    }
}

/// Result file locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Directory receiving all result files.
    pub results_dir: PathBuf,
    /// Appended to every result file name.
    pub run_suffix: String,
    /// Also write the network definition with the found policy as control rules.
    pub write_controlled_network: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            run_suffix: String::new(),
            write_controlled_network: true,
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"control.horizon_hours"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl MpcConfig {
    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("config", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let c = &self.control;
        if !(c.horizon_hours > 0.0) {
            errors.push(ConfigError::new("control.horizon_hours", "must be > 0"));
        }
        if !(c.time_step_seconds >= 1.0) {
            errors.push(ConfigError::new("control.time_step_seconds", "must be >= 1"));
        }
        if c.horizon_hours > 0.0 && c.time_step_seconds >= 1.0 && c.horizon_steps() == 0 {
            errors.push(ConfigError::new(
                "control.horizon_hours",
                "must cover at least one control time step",
            ));
        }
        if c.structure_ids.is_empty() {
            errors.push(ConfigError::new(
                "control.structure_ids",
                "at least one controlled structure is required",
            ));
        }
        for (i, id) in c.structure_ids.iter().enumerate() {
            if id.trim().is_empty() {
                errors.push(ConfigError::new(
                    format!("control.structure_ids[{i}]"),
                    "must not be blank",
                ));
            }
            if c.structure_ids[..i].contains(id) {
                errors.push(ConfigError::new(
                    format!("control.structure_ids[{i}]"),
                    format!("duplicate structure \"{id}\""),
                ));
            }
        }
        if let Some(secs) = c.tick_deadline_seconds {
            if !(secs > 0.0) {
                errors.push(ConfigError::new(
                    "control.tick_deadline_seconds",
                    "must be > 0 when set",
                ));
            }
        }

        let cost = &self.cost;
        if !(cost.flood_weight >= 0.0) {
            errors.push(ConfigError::new("cost.flood_weight", "must be >= 0"));
        }
        if !(cost.deviation_weight >= 0.0) {
            errors.push(ConfigError::new("cost.deviation_weight", "must be >= 0"));
        }
        if !(cost.flood_exponent > 0.0) {
            errors.push(ConfigError::new("cost.flood_exponent", "must be > 0"));
        }
        if let Some(weights) = &cost.flood_weight_by_node {
            for (node, w) in weights {
                if !(*w >= 0.0) {
                    errors.push(ConfigError::new(
                        format!("cost.flood_weight_by_node.{node}"),
                        "must be >= 0",
                    ));
                }
            }
        }
        for (node, t) in &cost.target_depth_by_node {
            if !t.target.is_finite() || !(t.weight >= 0.0) {
                errors.push(ConfigError::new(
                    format!("cost.target_depth_by_node.{node}"),
                    "target must be finite and weight >= 0",
                ));
            }
        }

        let o = &self.optimizer;
        if o.generations == 0 {
            errors.push(ConfigError::new("optimizer.generations", "must be > 0"));
        }
        if o.population_size < 2 {
            errors.push(ConfigError::new("optimizer.population_size", "must be >= 2"));
        }
        for (field, p) in [
            ("optimizer.crossover_probability", o.crossover_probability),
            ("optimizer.mutation_probability", o.mutation_probability),
            (
                "optimizer.gene_mutation_probability",
                o.gene_mutation_probability,
            ),
        ] {
            if !(0.0..=1.0).contains(&p) {
                errors.push(ConfigError::new(field, "must be in [0.0, 1.0]"));
            }
        }
        if o.tournament_size == 0 {
            errors.push(ConfigError::new("optimizer.tournament_size", "must be > 0"));
        }
        if o.grid_max == 0 {
            errors.push(ConfigError::new("optimizer.grid_max", "must be > 0"));
        }

        errors
    }
}
