//! CSV and TOML export of run results.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::config::OutputConfig;
use crate::error::Result;
use crate::mpc::control_loop::{MpcRun, TickReport};
use crate::mpc::history::ControlHistory;
use crate::network::definition::NetworkDefinition;
use crate::sim::SimulationState;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format of the run stamp embedded in result file names.
pub const STAMP_FORMAT: &str = "%Y.%m.%d.%H.%M";

/// Column header for the optimiser log.
const OPTIMIZER_LOG_HEADER: &str = "tick,datetime,horizon_steps,generation,evaluations,invalid,\
                                    min_cost,mean_cost,max_cost,best_cost,fallback,timed_out";

/// Builds `<prefix>_<stamp><suffix>.<ext>`.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use storm_mpc::io::export::results_file_name;
///
/// let stamp = NaiveDate::from_ymd_opt(2024, 6, 1)
///     .and_then(|d| d.and_hms_opt(13, 5, 0))
///     .unwrap();
/// assert_eq!(
///     results_file_name("ctl_results", stamp, "_run1", "csv"),
///     "ctl_results_2024.06.01.13.05_run1.csv"
/// );
/// ```
pub fn results_file_name(prefix: &str, stamp: NaiveDateTime, suffix: &str, ext: &str) -> String {
    format!("{prefix}_{}{suffix}.{ext}", stamp.format(STAMP_FORMAT))
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.6}")).unwrap_or_default()
}

/// Writes the consolidated control history as CSV.
///
/// One `datetime` column plus one `setting_<structure id>` column per
/// structure; the first row is the fully-open default at `start`.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_control_history(
    history: &ControlHistory,
    start: NaiveDateTime,
    writer: impl Write,
) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    let mut header = vec!["datetime".to_string()];
    header.extend(
        history
            .structure_ids()
            .iter()
            .map(|id| format!("setting_{id}")),
    );
    wtr.write_record(&header)?;

    for record in history.consolidated(start) {
        let mut row = vec![record.time.format(DATETIME_FORMAT).to_string()];
        row.extend(record.settings.iter().map(|s| format!("{s:.4}")));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Writes one row per tick and generation.
///
/// A tick whose search never evaluated a generation still gets one row with
/// empty generation columns.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_optimizer_log(ticks: &[TickReport], writer: impl Write) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(OPTIMIZER_LOG_HEADER.split(',').map(str::trim))?;

    for t in ticks {
        let common = |generation: String,
                      evaluations: String,
                      invalid: String,
                      stats: [String; 3]|
         -> Vec<String> {
            let [min, mean, max] = stats;
            vec![
                t.tick.to_string(),
                t.time.format(DATETIME_FORMAT).to_string(),
                t.horizon_steps.to_string(),
                generation,
                evaluations,
                invalid,
                min,
                mean,
                max,
                fmt_opt(t.best_cost),
                t.fallback.to_string(),
                t.timed_out.to_string(),
            ]
        };
        if t.generations.is_empty() {
            wtr.write_record(common(
                String::new(),
                "0".to_string(),
                String::new(),
                Default::default(),
            ))?;
        }
        for g in &t.generations {
            wtr.write_record(common(
                g.generation.to_string(),
                g.evaluations.to_string(),
                g.invalid.to_string(),
                [fmt_opt(g.min), fmt_opt(g.mean), fmt_opt(g.max)],
            ))?;
        }
    }

    wtr.flush()?;
    Ok(())
}

/// Writes node depths and cumulative flood volumes per advanced interval.
///
/// Columns are `datetime`, then `depth_<node>` and `flood_<node>` for every
/// node of the first state.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_trajectory(trajectory: &[SimulationState], writer: impl Write) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    let nodes: Vec<&String> = trajectory
        .first()
        .map(|s| s.node_depths.keys().collect())
        .unwrap_or_default();

    let mut header = vec!["datetime".to_string()];
    header.extend(nodes.iter().map(|n| format!("depth_{n}")));
    header.extend(nodes.iter().map(|n| format!("flood_{n}")));
    wtr.write_record(&header)?;

    for state in trajectory {
        let mut row = vec![state.time.format(DATETIME_FORMAT).to_string()];
        row.extend(nodes.iter().map(|n| fmt_opt(state.depth(n))));
        row.extend(nodes.iter().map(|n| fmt_opt(state.flood_volume(n))));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

fn export_with(
    path: &Path,
    write: impl FnOnce(io::BufWriter<File>) -> Result<()>,
) -> Result<()> {
    let file = File::create(path)?;
    write(io::BufWriter::new(file))
}

/// Paths of every file written for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutputs {
    pub control_history: PathBuf,
    pub optimizer_log: PathBuf,
    pub trajectory: PathBuf,
    pub controlled_network: Option<PathBuf>,
}

/// Writes every result file of `run` into `output.results_dir`.
///
/// File names carry `stamp` (the wall-clock start of the run) and the run
/// suffix. The controlled network is `definition` with the consolidated
/// history baked in as native control rules.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or any file fails to write.
pub fn write_run_outputs(
    run: &MpcRun,
    definition: &NetworkDefinition,
    output: &OutputConfig,
    stamp: NaiveDateTime,
) -> Result<RunOutputs> {
    fs::create_dir_all(&output.results_dir)?;
    let path = |prefix: &str, ext: &str| {
        output
            .results_dir
            .join(results_file_name(prefix, stamp, &output.run_suffix, ext))
    };

    let outputs = RunOutputs {
        control_history: path("ctl_results", "csv"),
        optimizer_log: path("optimizer_log", "csv"),
        trajectory: path("depth_trajectory", "csv"),
        controlled_network: output
            .write_controlled_network
            .then(|| path("ctl_network", "toml")),
    };

    export_with(&outputs.control_history, |w| {
        write_control_history(&run.history, run.start_time, w)
    })?;
    export_with(&outputs.optimizer_log, |w| write_optimizer_log(&run.ticks, w))?;
    export_with(&outputs.trajectory, |w| write_trajectory(&run.trajectory, w))?;

    if let Some(network_path) = &outputs.controlled_network {
        let records = run.history.consolidated(run.start_time);
        let controlled = definition.with_control_records(&run.native_ids, &records);
        fs::write(network_path, controlled.to_toml_string()?)?;
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc::control_loop::LoopState;
    use crate::mpc::optimizer::GenerationStats;
    use crate::presets;
    use chrono::{NaiveDate, TimeDelta};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid date")
    }

    fn history() -> ControlHistory {
        let ids = vec!["ORIFICE R1".to_string(), "ORIFICE R2".to_string()];
        let mut h = ControlHistory::new(ids);
        h.push(t0() + TimeDelta::minutes(15), vec![0.3, 1.0]);
        h.push(t0() + TimeDelta::minutes(30), vec![0.3, 0.0]);
        h
    }

    fn stats(generation: usize) -> GenerationStats {
        GenerationStats {
            generation,
            evaluations: 10,
            invalid: 1,
            min: Some(1.0),
            mean: Some(2.0),
            max: Some(3.0),
        }
    }

    fn tick(n: usize, generations: Vec<GenerationStats>) -> TickReport {
        TickReport {
            tick: n,
            time: t0() + TimeDelta::minutes(15 * n as i64),
            horizon_steps: 4,
            best_cost: generations.first().and_then(|g| g.min),
            settings: vec![0.3, 1.0],
            fallback: generations.is_empty(),
            timed_out: generations.is_empty(),
            evaluations: generations.iter().map(|g| g.evaluations).sum(),
            generations,
            elapsed: Duration::from_millis(5),
        }
    }

    fn state(minutes: i64) -> SimulationState {
        SimulationState {
            time: t0() + TimeDelta::minutes(minutes),
            node_depths: BTreeMap::from([
                ("J3".to_string(), 0.25),
                ("St1".to_string(), 1.5),
            ]),
            link_flows: BTreeMap::new(),
            node_flood_volumes: BTreeMap::from([
                ("J3".to_string(), 2.0),
                ("St1".to_string(), 0.0),
            ]),
        }
    }

    fn to_string(write: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buf = Vec::new();
        write(&mut buf).expect("write should succeed");
        String::from_utf8(buf).unwrap_or_default()
    }

    #[test]
    fn control_history_has_setting_columns_and_initial_row() {
        let out = to_string(|b| write_control_history(&history(), t0(), b));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "datetime,setting_ORIFICE R1,setting_ORIFICE R2");
        assert_eq!(lines[1], "2024-06-01 00:00:00,1.0000,1.0000");
        assert_eq!(lines[2], "2024-06-01 00:15:00,0.3000,1.0000");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn control_history_is_deterministic() {
        let a = to_string(|b| write_control_history(&history(), t0(), b));
        let b = to_string(|b| write_control_history(&history(), t0(), b));
        assert_eq!(a, b);
    }

    #[test]
    fn optimizer_log_has_one_row_per_generation() {
        let ticks = vec![tick(1, vec![stats(0), stats(1), stats(2)]), tick(2, Vec::new())];
        let out = to_string(|b| write_optimizer_log(&ticks, b));
        let mut rdr = csv::ReaderBuilder::new().from_reader(out.as_bytes());
        assert_eq!(rdr.headers().map(csv::StringRecord::len).ok(), Some(12));
        let rows: Vec<csv::StringRecord> = rdr.records().filter_map(|r| r.ok()).collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(&rows[2][3], "2");
        assert_eq!(rows[0][6].parse::<f64>().ok(), Some(1.0));
        // timed-out tick without generations
        assert_eq!(&rows[3][3], "");
        assert_eq!(&rows[3][10], "true");
    }

    #[test]
    fn trajectory_has_depth_and_flood_columns() {
        let out = to_string(|b| write_trajectory(&[state(15), state(30)], b));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "datetime,depth_J3,depth_St1,flood_J3,flood_St1");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("2024-06-01 00:15:00,0.250000,1.500000,2.000000"));
    }

    #[test]
    fn empty_trajectory_writes_header_only() {
        let out = to_string(|b| write_trajectory(&[], b));
        assert_eq!(out.lines().collect::<Vec<_>>(), vec!["datetime"]);
    }

    #[test]
    fn run_outputs_land_in_results_dir() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let output = OutputConfig {
            results_dir: dir.path().join("results"),
            run_suffix: "_test".to_string(),
            write_controlled_network: true,
        };
        let run = MpcRun {
            state: LoopState::Finished,
            failure: None,
            native_ids: vec!["R1".to_string(), "R2".to_string()],
            start_time: t0(),
            history: history(),
            ticks: vec![tick(1, vec![stats(0)])],
            trajectory: vec![state(15)],
        };
        let network = presets::simple_2_ctl_network();
        let stamp = t0() + TimeDelta::hours(9);

        let outputs =
            write_run_outputs(&run, &network, &output, stamp).expect("outputs should be written");
        assert_eq!(
            outputs.control_history.file_name().and_then(|n| n.to_str()),
            Some("ctl_results_2024.06.01.09.00_test.csv")
        );
        assert!(outputs.control_history.exists());
        assert!(outputs.optimizer_log.exists());
        assert!(outputs.trajectory.exists());

        let network_path = outputs.controlled_network.expect("network requested");
        let baked = NetworkDefinition::from_toml_file(&network_path).expect("network parses back");
        // R1: 1.0 then 0.3; R2: 1.0 then 0.0 (the repeated 1.0 collapses)
        assert_eq!(baked.controls.len(), 4);
        assert!(baked.validate().is_empty());
    }

    #[test]
    fn controlled_network_can_be_skipped() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let output = OutputConfig {
            results_dir: dir.path().to_path_buf(),
            run_suffix: String::new(),
            write_controlled_network: false,
        };
        let run = MpcRun {
            state: LoopState::Failed,
            failure: Some("simulation error".to_string()),
            native_ids: vec!["R1".to_string(), "R2".to_string()],
            start_time: t0(),
            history: history(),
            ticks: Vec::new(),
            trajectory: Vec::new(),
        };
        let outputs = write_run_outputs(&run, &presets::simple_2_ctl_network(), &output, t0())
            .expect("outputs should be written");
        assert!(outputs.controlled_network.is_none());
        assert!(outputs.control_history.exists());
    }
}
