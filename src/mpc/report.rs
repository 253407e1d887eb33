//! Post-hoc summary of a control run.

use std::collections::BTreeMap;
use std::fmt;

use super::control_loop::{LoopState, MpcRun};

/// Aggregate indicators derived from a finished or failed run.
///
/// Computed post-hoc from the run's tick reports and live trajectory so the
/// summary always agrees with the exported files.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub state: LoopState,
    pub failure: Option<String>,
    /// Control ticks completed.
    pub ticks: usize,
    /// Ticks that applied the fallback setting.
    pub fallback_ticks: usize,
    /// Ticks whose search hit the deadline.
    pub timed_out_ticks: usize,
    /// Cost evaluations across all ticks.
    pub evaluations: usize,
    /// Mean of the chosen policies' predicted costs.
    pub mean_best_cost: Option<f64>,
    /// Mean wall-clock time per tick (s).
    pub mean_tick_seconds: f64,
    /// Slowest tick (s).
    pub max_tick_seconds: f64,
    /// Flood volume per node at the end of the run (m³).
    pub flood_by_node: BTreeMap<String, f64>,
    /// Highest depth reached per node (m).
    pub peak_depth_by_node: BTreeMap<String, f64>,
}

impl RunReport {
    pub fn from_run(run: &MpcRun) -> Self {
        let ticks = run.ticks.len();
        let costs: Vec<f64> = run.ticks.iter().filter_map(|t| t.best_cost).collect();
        let mean_best_cost = if costs.is_empty() {
            None
        } else {
            Some(costs.iter().sum::<f64>() / costs.len() as f64)
        };

        let seconds: Vec<f64> = run
            .ticks
            .iter()
            .map(|t| t.elapsed.as_secs_f64())
            .collect();
        let mean_tick_seconds = if ticks > 0 {
            seconds.iter().sum::<f64>() / ticks as f64
        } else {
            0.0
        };
        let max_tick_seconds = seconds.iter().copied().fold(0.0, f64::max);

        let mut peak_depth_by_node: BTreeMap<String, f64> = BTreeMap::new();
        for state in &run.trajectory {
            for (node, &depth) in &state.node_depths {
                let peak = peak_depth_by_node.entry(node.clone()).or_insert(depth);
                *peak = peak.max(depth);
            }
        }

        Self {
            state: run.state,
            failure: run.failure.clone(),
            ticks,
            fallback_ticks: run.ticks.iter().filter(|t| t.fallback).count(),
            timed_out_ticks: run.ticks.iter().filter(|t| t.timed_out).count(),
            evaluations: run.ticks.iter().map(|t| t.evaluations).sum(),
            mean_best_cost,
            mean_tick_seconds,
            max_tick_seconds,
            flood_by_node: run
                .trajectory
                .last()
                .map(|s| s.node_flood_volumes.clone())
                .unwrap_or_default(),
            peak_depth_by_node,
        }
    }

    /// Flood volume summed over every node (m³).
    pub fn total_flood_volume(&self) -> f64 {
        self.flood_by_node.values().sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- MPC Run Report ---")?;
        match &self.failure {
            Some(reason) => writeln!(f, "Status:             {:?} ({reason})", self.state)?,
            None => writeln!(f, "Status:             {:?}", self.state)?,
        }
        writeln!(f, "Control ticks:      {}", self.ticks)?;
        writeln!(
            f,
            "Fallback ticks:     {} ({} timed out)",
            self.fallback_ticks, self.timed_out_ticks
        )?;
        writeln!(f, "Cost evaluations:   {}", self.evaluations)?;
        match self.mean_best_cost {
            Some(c) => writeln!(f, "Mean best cost:     {c:.4}")?,
            None => writeln!(f, "Mean best cost:     n/a")?,
        }
        writeln!(
            f,
            "Tick time:          {:.3} s mean, {:.3} s max",
            self.mean_tick_seconds, self.max_tick_seconds
        )?;
        writeln!(f, "Total flooding:     {:.2} m3", self.total_flood_volume())?;
        for (node, peak) in &self.peak_depth_by_node {
            let flood = self.flood_by_node.get(node).copied().unwrap_or(0.0);
            writeln!(f, "  {node:<8} peak {peak:.3} m, flooded {flood:.2} m3")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc::control_loop::TickReport;
    use crate::mpc::history::ControlHistory;
    use crate::sim::SimulationState;
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
    use std::time::Duration;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid date")
    }

    fn tick(n: usize, cost: Option<f64>, millis: u64) -> TickReport {
        TickReport {
            tick: n,
            time: t0() + TimeDelta::minutes(15 * n as i64),
            horizon_steps: 4,
            best_cost: cost,
            settings: vec![0.5],
            fallback: cost.is_none(),
            timed_out: false,
            evaluations: 100,
            generations: Vec::new(),
            elapsed: Duration::from_millis(millis),
        }
    }

    fn state(minutes: i64, depth: f64, flood: f64) -> SimulationState {
        SimulationState {
            time: t0() + TimeDelta::minutes(minutes),
            node_depths: BTreeMap::from([("St1".to_string(), depth)]),
            link_flows: BTreeMap::new(),
            node_flood_volumes: BTreeMap::from([("St1".to_string(), flood)]),
        }
    }

    fn run() -> MpcRun {
        MpcRun {
            state: LoopState::Finished,
            failure: None,
            native_ids: vec!["R1".to_string()],
            start_time: t0(),
            history: ControlHistory::new(vec!["ORIFICE R1".to_string()]),
            ticks: vec![tick(1, Some(2.0), 100), tick(2, None, 300), tick(3, Some(4.0), 200)],
            trajectory: vec![state(15, 0.8, 0.0), state(30, 1.7, 3.0), state(45, 1.2, 5.0)],
        }
    }

    #[test]
    fn aggregates_ticks() {
        let report = RunReport::from_run(&run());
        assert_eq!(report.ticks, 3);
        assert_eq!(report.fallback_ticks, 1);
        assert_eq!(report.evaluations, 300);
        assert_eq!(report.mean_best_cost, Some(3.0));
        assert!((report.mean_tick_seconds - 0.2).abs() < 1e-9);
        assert!((report.max_tick_seconds - 0.3).abs() < 1e-9);
    }

    #[test]
    fn flooding_and_peaks_come_from_trajectory() {
        let report = RunReport::from_run(&run());
        assert_eq!(report.total_flood_volume(), 5.0);
        assert_eq!(report.peak_depth_by_node.get("St1"), Some(&1.7));
    }

    #[test]
    fn empty_run_reports_zeros() {
        let mut empty = run();
        empty.ticks.clear();
        empty.trajectory.clear();
        let report = RunReport::from_run(&empty);
        assert_eq!(report.ticks, 0);
        assert_eq!(report.mean_best_cost, None);
        assert_eq!(report.mean_tick_seconds, 0.0);
        assert_eq!(report.total_flood_volume(), 0.0);
    }

    #[test]
    fn display_names_failure() {
        let mut failed = run();
        failed.state = LoopState::Failed;
        failed.failure = Some("simulation error: diverged".to_string());
        let text = RunReport::from_run(&failed).to_string();
        assert!(text.contains("Failed"));
        assert!(text.contains("diverged"));
        assert!(text.contains("St1"));
    }
}
