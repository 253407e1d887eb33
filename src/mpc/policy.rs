//! Mapping between flat integer chromosomes and per-structure setting schedules.

use crate::error::{MpcError, Result};

/// Default number of setting levels above fully closed (0 → 0.0, 10 → 1.0).
pub const DEFAULT_GRID_MAX: u8 = 10;

/// Flat gene vector: all horizon steps of structure 1, then structure 2, …
pub type Chromosome = Vec<u8>;

/// Planned settings for one controlled structure.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureSchedule {
    pub structure_id: String,
    /// One fraction in `[0, 1]` per planning step.
    pub settings: Vec<f64>,
}

/// Per-structure setting schedules of uniform length.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPolicy {
    schedules: Vec<StructureSchedule>,
    steps: usize,
}

impl ControlPolicy {
    /// Builds a policy, checking that schedules share one length and hold fractions.
    ///
    /// # Errors
    ///
    /// `MpcError::Validation` on ragged schedules or settings outside `[0, 1]`.
    pub fn new(schedules: Vec<StructureSchedule>) -> Result<Self> {
        let steps = schedules.first().map_or(0, |s| s.settings.len());
        if let Some(ragged) = schedules.iter().find(|s| s.settings.len() != steps) {
            return Err(MpcError::Validation(format!(
                "schedule for \"{}\" has {} steps, expected {steps}",
                ragged.structure_id,
                ragged.settings.len()
            )));
        }
        for s in &schedules {
            if let Some(bad) = s.settings.iter().find(|v| !(0.0..=1.0).contains(*v)) {
                return Err(MpcError::Validation(format!(
                    "setting {bad} for \"{}\" is outside [0, 1]",
                    s.structure_id
                )));
            }
        }
        Ok(Self { schedules, steps })
    }

    /// Number of planning steps.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn schedules(&self) -> &[StructureSchedule] {
        &self.schedules
    }

    /// Settings of every structure at `step`, in structure order.
    pub fn settings_at(&self, step: usize) -> Option<Vec<f64>> {
        if step >= self.steps {
            return None;
        }
        Some(self.schedules.iter().map(|s| s.settings[step]).collect())
    }

    /// The only part of a plan the receding-horizon loop commits.
    pub fn first_step(&self) -> Option<Vec<f64>> {
        self.settings_at(0)
    }
}

/// Stateless chromosome ⇄ policy transform on a fixed setting grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyEncoder {
    grid_max: u8,
}

impl Default for PolicyEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_MAX)
    }
}

impl PolicyEncoder {
    /// # Panics
    ///
    /// Panics if `grid_max` is zero.
    pub fn new(grid_max: u8) -> Self {
        assert!(grid_max > 0, "grid_max must be > 0");
        Self { grid_max }
    }

    pub fn grid_max(&self) -> u8 {
        self.grid_max
    }

    /// Fraction represented by grid value `v`.
    pub fn fraction(&self, v: u8) -> f64 {
        f64::from(v) / f64::from(self.grid_max)
    }

    /// Nearest grid value for `fraction`.
    ///
    /// # Errors
    ///
    /// `MpcError::Validation` if `fraction` is not in `[0, 1]`.
    pub fn grid_value(&self, fraction: f64) -> Result<u8> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(MpcError::Validation(format!(
                "fraction {fraction} is outside [0, 1]"
            )));
        }
        Ok((fraction * f64::from(self.grid_max)).round() as u8)
    }

    /// Splits `chromosome` into one schedule per structure.
    ///
    /// # Errors
    ///
    /// `MpcError::Shape` unless `chromosome.len() == structure_ids.len() * horizon_steps`;
    /// `MpcError::Validation` if a gene exceeds the grid.
    pub fn decode(
        &self,
        chromosome: &[u8],
        structure_ids: &[String],
        horizon_steps: usize,
    ) -> Result<ControlPolicy> {
        let expected = structure_ids.len() * horizon_steps;
        if chromosome.len() != expected {
            return Err(MpcError::Shape {
                actual: chromosome.len(),
                expected,
                structures: structure_ids.len(),
                horizon_steps,
            });
        }
        if let Some(&bad) = chromosome.iter().find(|&&g| g > self.grid_max) {
            return Err(MpcError::Validation(format!(
                "gene {bad} exceeds grid maximum {}",
                self.grid_max
            )));
        }

        let schedules = structure_ids
            .iter()
            .enumerate()
            .map(|(i, id)| StructureSchedule {
                structure_id: id.clone(),
                settings: chromosome[i * horizon_steps..(i + 1) * horizon_steps]
                    .iter()
                    .map(|&g| self.fraction(g))
                    .collect(),
            })
            .collect();
        Ok(ControlPolicy {
            schedules,
            steps: horizon_steps,
        })
    }

    /// Flattens `policy` back into genes, rounding to the nearest grid value.
    pub fn encode(&self, policy: &ControlPolicy) -> Result<Chromosome> {
        policy
            .schedules
            .iter()
            .flat_map(|s| s.settings.iter())
            .map(|&f| self.grid_value(f))
            .collect()
    }
}
