//! storm-mpc entry point: CLI wiring, scenario loading and result export.

use std::process;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use storm_mpc::cli::CliOptions;
use storm_mpc::io::export::write_run_outputs;
use storm_mpc::mpc::report::RunReport;
use storm_mpc::runner::run_scenario;

fn init_tracing(opts: &CliOptions) {
    let filter = match opts.verbosity_filter() {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let opts = CliOptions::parse();
    init_tracing(&opts);

    let mut scenario = match opts.load_scenario() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    opts.apply_overrides(&mut scenario.config);

    let errors = scenario.validate();
    if !errors.is_empty() {
        eprintln!("Invalid scenario:");
        for e in &errors {
            eprintln!("  - {e}");
        }
        process::exit(1);
    }

    let stamp = chrono::Local::now().naive_local();
    let run = match run_scenario(&scenario) {
        Ok(run) => run,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    if let Some(reason) = &run.failure {
        error!(%reason, ticks = run.ticks.len(), "control run failed, writing partial results");
    }

    match write_run_outputs(&run, &scenario.network, &scenario.config.output, stamp) {
        Ok(outputs) => {
            info!(path = %outputs.control_history.display(), "wrote control history");
            info!(path = %outputs.optimizer_log.display(), "wrote optimizer log");
            info!(path = %outputs.trajectory.display(), "wrote depth trajectory");
            if let Some(path) = &outputs.controlled_network {
                info!(path = %path.display(), "wrote controlled network");
            }
        }
        Err(e) => {
            warn!(error = %e, "failed to write results");
            eprintln!("error: failed to write results: {e}");
            process::exit(1);
        }
    }

    println!("{}", RunReport::from_run(&run));
    if !run.succeeded() {
        process::exit(1);
    }
}
