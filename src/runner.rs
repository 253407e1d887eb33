use chrono::TimeDelta;
use tracing::{info, warn};

use crate::error::{MpcError, Result};
use crate::mpc::control_loop::{ControlLoop, ControlSettings, MpcRun};
use crate::mpc::optimizer::{GaSettings, GeneticOptimizer};
use crate::network::model::LumpedNetwork;
use crate::presets::Scenario;

/// Runs `scenario` on the lumped network model with the genetic optimiser.
///
/// A run that fails mid-simulation still returns `Ok`; its [`MpcRun`]
/// carries the failed state and everything recorded up to the failure.
///
/// # Errors
///
/// Configuration and validation problems found before the simulation starts.
pub fn run_scenario(scenario: &Scenario) -> Result<MpcRun> {
    let errors = scenario.validate();
    if !errors.is_empty() {
        return Err(MpcError::Config(errors));
    }

    let cfg = &scenario.config;
    let step_ms = (cfg.control.time_step_seconds * 1000.0).round() as i64;
    let sim = LumpedNetwork::new(scenario.network.clone(), TimeDelta::milliseconds(step_ms))?;
    let optimizer = GeneticOptimizer::new(GaSettings::from(&cfg.optimizer));
    let settings = ControlSettings::from_config(cfg);

    info!(
        network = %scenario.network.name,
        structures = ?settings.structure_ids,
        horizon_steps = settings.horizon_steps,
        population = cfg.optimizer.population_size,
        generations = cfg.optimizer.generations,
        "starting control run"
    );
    let mut control = ControlLoop::new(settings, sim, optimizer)?;
    if let Err(e) = control.run() {
        warn!(
            error = %e,
            fatal = e.is_fatal(),
            ticks = control.ticks().len(),
            "control run stopped early, returning partial results"
        );
    }
    Ok(control.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc::control_loop::LoopState;

    fn small(name: &str) -> Scenario {
        let mut scenario = Scenario::from_preset(name).expect("preset exists");
        scenario.config.optimizer.population_size = 8;
        scenario.config.optimizer.generations = 1;
        scenario.config.optimizer.tournament_size = 2;
        scenario
    }

    #[test]
    fn finished_run_has_no_failure() {
        let run = run_scenario(&small("simple_1_ctl")).expect("valid scenario");
        assert_eq!(run.state, LoopState::Finished);
        assert!(run.failure.is_none());
        assert!(run.succeeded());
    }

    #[test]
    fn aliased_structures_fail_before_running() {
        let mut scenario = small("simple_1_ctl");
        scenario.config.control.structure_ids = vec!["R1".to_string(), "ORIFICE R1".to_string()];
        let err = run_scenario(&scenario).err();
        assert!(matches!(err, Some(MpcError::Validation(_))), "{err:?}");
    }

    #[test]
    fn invalid_config_is_an_error_not_a_failed_run() {
        let mut scenario = small("simple_1_ctl");
        scenario.config.control.structure_ids.clear();
        let err = run_scenario(&scenario).err();
        assert!(matches!(err, Some(MpcError::Config(_))), "{err:?}");
    }
}
