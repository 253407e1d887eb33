//! The boundary between the control loop and a hydraulic engine.

use chrono::{NaiveDateTime, TimeDelta};

use crate::error::Result;

use super::types::SimulationState;

/// A hydraulic simulation advanced one control interval at a time.
///
/// Implementors wrap an engine that can capture its internal state into an
/// opaque [`Simulator::Snapshot`] and build fresh, independent instances from
/// such a handle. The control loop owns exactly one live instance; every
/// candidate policy is scored on its own instance restored from a snapshot.
///
/// `Sync` is required because the live instance serves as the prototype for
/// restores performed concurrently by fitness evaluations.
pub trait Simulator: Sized + Sync {
    /// Engine state sufficient to resume the simulation exactly.
    type Snapshot: Clone + Send + Sync;

    /// Formal start of the simulation.
    fn start_time(&self) -> NaiveDateTime;

    /// Formal end of the simulation.
    fn end_time(&self) -> NaiveDateTime;

    /// Current simulated instant.
    fn current_time(&self) -> NaiveDateTime;

    /// Length of one control interval.
    fn control_step(&self) -> TimeDelta;

    /// Control intervals left before the end, counting a trailing partial one.
    fn steps_remaining(&self) -> usize;

    fn is_finished(&self) -> bool {
        self.steps_remaining() == 0
    }

    /// Steps forward by one control interval.
    ///
    /// Returns `true` once the end of the simulation has been reached.
    ///
    /// # Errors
    ///
    /// `MpcError::Simulation` if the engine reports a runtime fault.
    fn advance(&mut self) -> Result<bool>;

    /// Readings at the current instant. Pure read.
    fn current_state(&self) -> SimulationState;

    /// Captures the engine state at the current instant.
    ///
    /// # Errors
    ///
    /// `MpcError::Snapshot` if the engine cannot produce a resumable state.
    fn snapshot(&self) -> Result<Self::Snapshot>;

    /// Builds a new, independent instance continuing from `handle`.
    ///
    /// `self` only supplies the network definition; its own state is untouched.
    ///
    /// # Errors
    ///
    /// `MpcError::Restore` if `handle` was produced from a different network.
    fn restore_from(&self, handle: &Self::Snapshot) -> Result<Self>;

    /// Applies a fractional setting to a controlled structure from now on.
    ///
    /// # Errors
    ///
    /// `MpcError::Validation` for a fraction outside `[0, 1]` or an unknown structure.
    fn set_control(&mut self, structure_id: &str, fraction: f64) -> Result<()>;

    /// Maps a configured structure id (e.g. `"ORIFICE R1"`) to the engine's own id.
    ///
    /// # Errors
    ///
    /// `MpcError::Validation` if no controllable structure matches.
    fn resolve_structure(&self, structure_id: &str) -> Result<String>;

    /// Removes engine-native control rules; returns how many were removed.
    fn clear_control_rules(&mut self) -> usize;
}

/// Resolves every configured structure id, failing on the first unknown one.
pub fn resolve_structures<S: Simulator>(sim: &S, structure_ids: &[String]) -> Result<Vec<String>> {
    structure_ids
        .iter()
        .map(|id| sim.resolve_structure(id))
        .collect()
}

/// Validates a fractional setting.
pub(crate) fn check_fraction(structure_id: &str, fraction: f64) -> Result<()> {
    if (0.0..=1.0).contains(&fraction) {
        Ok(())
    } else {
        Err(crate::error::MpcError::Validation(format!(
            "setting {fraction} for \"{structure_id}\" is outside [0, 1]"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::check_fraction;

    #[test]
    fn fractions_inside_unit_interval_pass() {
        assert!(check_fraction("R1", 0.0).is_ok());
        assert!(check_fraction("R1", 0.5).is_ok());
        assert!(check_fraction("R1", 1.0).is_ok());
    }

    #[test]
    fn fractions_outside_unit_interval_fail() {
        assert!(check_fraction("R1", -0.1).is_err());
        assert!(check_fraction("R1", 1.01).is_err());
        assert!(check_fraction("R1", f64::NAN).is_err());
    }
}
