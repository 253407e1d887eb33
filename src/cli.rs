//! Command-line options.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::MpcConfig;
use crate::presets::Scenario;

/// Preset used when neither files nor a preset are given.
pub const DEFAULT_PRESET: &str = "simple_2_ctl";

/// Receding-horizon MPC for stormwater networks.
#[derive(Debug, Parser)]
#[command(name = "storm-mpc", version)]
pub struct CliOptions {
    /// Run configuration TOML (requires --network)
    #[arg(long, value_name = "PATH", requires = "network", conflicts_with = "preset")]
    pub config: Option<PathBuf>,

    /// Network definition TOML (requires --config)
    #[arg(long, value_name = "PATH", requires = "config", conflicts_with = "preset")]
    pub network: Option<PathBuf>,

    /// Built-in scenario (simple_1_ctl, simple_2_ctl)
    #[arg(long, value_name = "NAME")]
    pub preset: Option<String>,

    /// Override the optimiser seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the results directory
    #[arg(long, value_name = "DIR")]
    pub results_dir: Option<PathBuf>,

    /// Override the suffix appended to result file names
    #[arg(long, value_name = "SUFFIX")]
    pub run_suffix: Option<String>,

    /// Skip writing the network with the found policy baked in
    #[arg(long)]
    pub no_controlled_network: bool,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Where the scenario comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioSource {
    Files { config: PathBuf, network: PathBuf },
    Preset(String),
}

impl CliOptions {
    pub fn source(&self) -> ScenarioSource {
        match (&self.config, &self.network, &self.preset) {
            (Some(config), Some(network), _) => ScenarioSource::Files {
                config: config.clone(),
                network: network.clone(),
            },
            (_, _, Some(name)) => ScenarioSource::Preset(name.clone()),
            _ => ScenarioSource::Preset(DEFAULT_PRESET.to_string()),
        }
    }

    /// Loads the selected scenario.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for unreadable files or an unknown preset.
    pub fn load_scenario(&self) -> Result<Scenario, crate::config::ConfigError> {
        match self.source() {
            ScenarioSource::Files { config, network } => Scenario::from_files(&config, &network),
            ScenarioSource::Preset(name) => Scenario::from_preset(&name),
        }
    }

    /// Applies command-line overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, cfg: &mut MpcConfig) {
        if let Some(seed) = self.seed {
            cfg.optimizer.seed = seed;
        }
        if let Some(dir) = &self.results_dir {
            cfg.output.results_dir = dir.clone();
        }
        if let Some(suffix) = &self.run_suffix {
            cfg.output.run_suffix = suffix.clone();
        }
        if self.no_controlled_network {
            cfg.output.write_controlled_network = false;
        }
    }

    /// Log filter implied by `-v`, or `None` to defer to `RUST_LOG`.
    pub fn verbosity_filter(&self) -> Option<&'static str> {
        match self.verbose {
            0 => None,
            1 => Some("debug"),
            _ => Some("trace"),
        }
    }
}

/// Parses options from an explicit argument list (first item is the binary name).
///
/// # Errors
///
/// Returns a clap error for unknown, missing or conflicting arguments.
pub fn parse_args_from<I, T>(args: I) -> Result<CliOptions, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CliOptions::try_parse_from(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliOptions, clap::Error> {
        parse_args_from(std::iter::once("storm-mpc").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_to_builtin_preset() {
        let opts = parse(&[]).expect("parse should succeed");
        assert_eq!(
            opts.source(),
            ScenarioSource::Preset(DEFAULT_PRESET.to_string())
        );
        assert_eq!(opts.verbosity_filter(), None);
    }

    #[test]
    fn supports_file_pair() {
        let opts = parse(&["--config", "run.toml", "--network", "net.toml"])
            .expect("parse should succeed");
        assert_eq!(
            opts.source(),
            ScenarioSource::Files {
                config: PathBuf::from("run.toml"),
                network: PathBuf::from("net.toml"),
            }
        );
    }

    #[test]
    fn config_requires_network() {
        assert!(parse(&["--config", "run.toml"]).is_err());
    }

    #[test]
    fn files_and_preset_are_exclusive() {
        let err = parse(&[
            "--config",
            "run.toml",
            "--network",
            "net.toml",
            "--preset",
            "simple_1_ctl",
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn overrides_replace_config_values() {
        let opts = parse(&[
            "--preset",
            "simple_1_ctl",
            "--seed",
            "7",
            "--results-dir",
            "out",
            "--run-suffix",
            "_a",
            "--no-controlled-network",
            "-vv",
        ])
        .expect("parse should succeed");
        let mut cfg = MpcConfig::default();
        opts.apply_overrides(&mut cfg);
        assert_eq!(cfg.optimizer.seed, 7);
        assert_eq!(cfg.output.results_dir, PathBuf::from("out"));
        assert_eq!(cfg.output.run_suffix, "_a");
        assert!(!cfg.output.write_controlled_network);
        assert_eq!(opts.verbosity_filter(), Some("trace"));
    }

    #[test]
    fn rejects_bad_seed() {
        assert!(parse(&["--seed", "minus-one"]).is_err());
    }

    #[test]
    fn loads_named_preset() {
        let opts = parse(&["--preset", "simple_1_ctl"]).expect("parse should succeed");
        let scenario = opts.load_scenario().expect("preset exists");
        assert_eq!(scenario.config.control.structure_ids, vec!["ORIFICE R1"]);
    }
}
