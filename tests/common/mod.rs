//! Shared test fixtures for integration tests.

#![allow(dead_code)]

use std::path::Path;

use storm_mpc::config::MpcConfig;
use storm_mpc::presets::Scenario;

/// Control intervals in the preset storm (6 h at 15 min).
pub const PRESET_INTERVALS: usize = 24;

/// Preset scenario with a small optimiser budget (12 individuals, 2 generations).
pub fn fast_scenario(name: &str) -> Scenario {
    let mut scenario = Scenario::from_preset(name).expect("preset should exist");
    shrink_optimizer(&mut scenario.config);
    scenario
}

/// Cuts the optimiser budget so a whole run takes well under a second.
pub fn shrink_optimizer(cfg: &mut MpcConfig) {
    cfg.optimizer.population_size = 12;
    cfg.optimizer.generations = 2;
    cfg.optimizer.tournament_size = 3;
}

/// Redirects every result file into `dir`.
pub fn output_into(cfg: &mut MpcConfig, dir: &Path) {
    cfg.output.results_dir = dir.to_path_buf();
    cfg.output.run_suffix = "_test".to_string();
}

/// Reads a CSV file into its header and rows.
pub fn read_csv(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).expect("csv should open");
    let header = reader
        .headers()
        .expect("csv should have a header")
        .iter()
        .map(str::to_string)
        .collect();
    let rows = reader
        .records()
        .map(|r| {
            r.expect("row should parse")
                .iter()
                .map(str::to_string)
                .collect()
        })
        .collect();
    (header, rows)
}
