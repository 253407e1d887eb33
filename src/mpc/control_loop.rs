//! Receding-horizon control of a live simulation.
//!
//! Each tick snapshots the live simulator, searches for the cheapest policy
//! over the next `min(horizon, remaining)` intervals, commits only the first
//! step of that policy, and advances the live simulation by one interval.

use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use tracing::{debug, error, info, warn};

use crate::config::{FallbackPolicy, MpcConfig};
use crate::error::{MpcError, Result};
use crate::sim::{SimulationState, Simulator, resolve_structures};

use super::cost::{CostEvaluator, CostWeights, HorizonObjective};
use super::history::ControlHistory;
use super::optimizer::{GenerationStats, PolicySearch};
use super::policy::PolicyEncoder;

/// Lifecycle of a [`ControlLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Stepping,
    Optimizing,
    Applying,
    Finished,
    Failed,
}

/// Everything the loop needs besides the simulator and the search.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSettings {
    /// Configured structure ids, in chromosome order.
    pub structure_ids: Vec<String>,
    /// Planning horizon in control intervals.
    pub horizon_steps: usize,
    pub weights: CostWeights,
    pub fallback: FallbackPolicy,
    /// Wall-clock budget for one tick's search.
    pub tick_deadline: Option<Duration>,
}

impl ControlSettings {
    pub fn from_config(cfg: &MpcConfig) -> Self {
        Self {
            structure_ids: cfg.control.structure_ids.clone(),
            horizon_steps: cfg.control.horizon_steps(),
            weights: CostWeights::from(&cfg.cost),
            fallback: cfg.control.fallback,
            tick_deadline: cfg
                .control
                .tick_deadline_seconds
                .map(Duration::from_secs_f64),
        }
    }
}

/// Diagnostics for one control tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// 1-based tick number.
    pub tick: usize,
    /// Simulated instant at which the decision was made.
    pub time: NaiveDateTime,
    /// Planning steps used this tick.
    pub horizon_steps: usize,
    /// Cost of the chosen policy; `None` when the fallback was applied.
    pub best_cost: Option<f64>,
    /// Settings committed to the live simulator.
    pub settings: Vec<f64>,
    pub fallback: bool,
    pub timed_out: bool,
    pub evaluations: usize,
    pub generations: Vec<GenerationStats>,
    pub elapsed: Duration,
}

/// Everything a run produced, for finished and failed runs alike.
#[derive(Debug, Clone)]
pub struct MpcRun {
    pub state: LoopState,
    /// Error that stopped a failed run.
    pub failure: Option<String>,
    /// Native ids of the controlled structures, aligned with the history's ids.
    pub native_ids: Vec<String>,
    pub start_time: NaiveDateTime,
    pub history: ControlHistory,
    pub ticks: Vec<TickReport>,
    /// Live state after every advanced interval.
    pub trajectory: Vec<SimulationState>,
}

impl MpcRun {
    pub fn succeeded(&self) -> bool {
        self.state == LoopState::Finished
    }
}

/// Drives a live simulator with a policy search until the simulation ends.
pub struct ControlLoop<S: Simulator, O: PolicySearch> {
    settings: ControlSettings,
    sim: S,
    optimizer: O,
    encoder: PolicyEncoder,
    native_ids: Vec<String>,
    state: LoopState,
    history: ControlHistory,
    ticks: Vec<TickReport>,
    trajectory: Vec<SimulationState>,
    failure: Option<String>,
}

impl<S: Simulator, O: PolicySearch> ControlLoop<S, O> {
    /// Validates `settings` against `sim` before any simulation work.
    ///
    /// # Errors
    ///
    /// `MpcError::Validation` for an empty structure list, a zero horizon, a
    /// structure the simulator cannot resolve, two ids resolving to the same
    /// link, or a cost weight naming a node the network does not have.
    pub fn new(settings: ControlSettings, sim: S, optimizer: O) -> Result<Self> {
        if settings.structure_ids.is_empty() {
            return Err(MpcError::Validation(
                "at least one controlled structure is required".to_string(),
            ));
        }
        if settings.horizon_steps == 0 {
            return Err(MpcError::Validation(
                "horizon must cover at least one control step".to_string(),
            ));
        }
        if optimizer.grid_max() == 0 {
            return Err(MpcError::Validation("grid_max must be > 0".to_string()));
        }
        let native_ids = resolve_structures(&sim, &settings.structure_ids)?;
        for (i, native) in native_ids.iter().enumerate() {
            if let Some(j) = native_ids[..i].iter().position(|n| n == native) {
                return Err(MpcError::Validation(format!(
                    "structures \"{}\" and \"{}\" both name link \"{native}\"",
                    settings.structure_ids[j], settings.structure_ids[i]
                )));
            }
        }

        let state = sim.current_state();
        if let Some(node) = settings
            .weights
            .referenced_nodes()
            .find(|n| !state.node_depths.contains_key(*n))
        {
            return Err(MpcError::Validation(format!(
                "cost weights reference unknown node \"{node}\""
            )));
        }

        Ok(Self {
            encoder: PolicyEncoder::new(optimizer.grid_max()),
            history: ControlHistory::new(settings.structure_ids.clone()),
            settings,
            sim,
            optimizer,
            native_ids,
            state: LoopState::Idle,
            ticks: Vec::new(),
            trajectory: Vec::new(),
            failure: None,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn history(&self) -> &ControlHistory {
        &self.history
    }

    pub fn ticks(&self) -> &[TickReport] {
        &self.ticks
    }

    pub fn simulator(&self) -> &S {
        &self.sim
    }

    /// Runs the loop to the end of the simulation.
    ///
    /// On error the loop is left in [`LoopState::Failed`] with everything
    /// recorded so far still available through [`ControlLoop::finish`].
    ///
    /// # Errors
    ///
    /// The first simulation, snapshot or restore error, or a validation error
    /// if the loop has already run.
    pub fn run(&mut self) -> Result<()> {
        if self.state != LoopState::Idle {
            return Err(MpcError::Validation(format!(
                "control loop cannot run from state {:?}",
                self.state
            )));
        }
        match self.drive() {
            Ok(()) => {
                self.transition(LoopState::Finished);
                info!(
                    ticks = self.ticks.len(),
                    end = %self.sim.current_time(),
                    "control loop finished"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    error = %e,
                    time = %self.sim.current_time(),
                    fatal = e.is_fatal(),
                    "control loop failed"
                );
                self.transition(LoopState::Failed);
                self.failure = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Consumes the loop and returns its recorded data.
    pub fn finish(self) -> MpcRun {
        MpcRun {
            state: self.state,
            failure: self.failure,
            native_ids: self.native_ids,
            start_time: self.sim.start_time(),
            history: self.history,
            ticks: self.ticks,
            trajectory: self.trajectory,
        }
    }

    fn transition(&mut self, next: LoopState) {
        debug!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }

    fn drive(&mut self) -> Result<()> {
        self.start()?;
        while !self.sim.is_finished() {
            self.tick()?;
        }
        Ok(())
    }

    /// Routes the first interval fully open with native rules removed.
    fn start(&mut self) -> Result<()> {
        self.transition(LoopState::Stepping);
        let removed = self.sim.clear_control_rules();
        if removed > 0 {
            info!(removed, "native control rules cleared");
        }
        for id in &self.native_ids {
            self.sim.set_control(id, 1.0)?;
        }
        self.sim.advance()?;
        self.trajectory.push(self.sim.current_state());
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        let started = Instant::now();
        let deadline = self.settings.tick_deadline.map(|d| started + d);
        let time = self.sim.current_time();
        let steps = self.settings.horizon_steps.min(self.sim.steps_remaining());

        self.transition(LoopState::Optimizing);
        let snapshot = self.sim.snapshot()?;
        // a handle that cannot be restored here would fail every candidate
        drop(self.sim.restore_from(&snapshot)?);

        let objective = HorizonObjective {
            evaluator: CostEvaluator::new(&self.sim, self.encoder),
            snapshot: &snapshot,
            structure_ids: &self.native_ids,
            horizon_steps: steps,
            weights: &self.settings.weights,
        };
        let result = self
            .optimizer
            .search(&objective, self.native_ids.len() * steps, deadline);

        self.transition(LoopState::Applying);
        let (settings, best_cost) = match &result.best {
            Some(best) => {
                let policy = self
                    .encoder
                    .decode(&best.chromosome, &self.native_ids, steps)?;
                let first = policy.first_step().ok_or_else(|| {
                    MpcError::Validation("best policy has no steps".to_string())
                })?;
                (first, Some(best.cost))
            }
            None => {
                let settings = self.fallback_settings();
                warn!(
                    %time,
                    policy = ?self.settings.fallback,
                    ?settings,
                    timed_out = result.timed_out,
                    "no valid policy found, applying fallback"
                );
                (settings, None)
            }
        };
        for (id, &fraction) in self.native_ids.iter().zip(&settings) {
            self.sim.set_control(id, fraction)?;
        }
        self.history.push(time, settings.clone());

        self.transition(LoopState::Stepping);
        self.sim.advance()?;
        self.trajectory.push(self.sim.current_state());

        let report = TickReport {
            tick: self.ticks.len() + 1,
            time,
            horizon_steps: steps,
            best_cost,
            settings,
            fallback: best_cost.is_none(),
            timed_out: result.timed_out,
            evaluations: result.evaluations,
            generations: result.generations,
            elapsed: started.elapsed(),
        };
        info!(
            tick = report.tick,
            %time,
            horizon = steps,
            best_cost = ?report.best_cost,
            settings = ?report.settings,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "control applied"
        );
        self.ticks.push(report);
        Ok(())
    }

    fn fallback_settings(&self) -> Vec<f64> {
        match self.settings.fallback {
            FallbackPolicy::HoldPrevious => self.history.last_settings(),
            FallbackPolicy::FullyOpen => vec![1.0; self.native_ids.len()],
        }
    }
}
