//! Error taxonomy shared by the simulator boundary, the optimiser, and the control loop.

use thiserror::Error;

use crate::config::ConfigError;

/// Crate-wide result alias.
pub type Result<T, E = MpcError> = std::result::Result<T, E>;

/// Every failure the MPC stack can report.
///
/// `Validation` and `Shape` are raised before any simulation work starts.
/// `Evaluation` is recoverable: the optimiser scores the candidate as invalid.
/// `Simulation`, `Snapshot` and `Restore` abort the control loop.
#[derive(Debug, Error)]
pub enum MpcError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(
        "shape error: chromosome has {actual} genes, expected {expected} \
         ({structures} structures x {horizon_steps} steps)"
    )]
    Shape {
        actual: usize,
        expected: usize,
        structures: usize,
        horizon_steps: usize,
    },

    #[error("simulation error: {0}")]
    Simulation(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("restore error: {0}")]
    Restore(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("{}", join_config_errors(.0))]
    Config(Vec<ConfigError>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl MpcError {
    /// Returns `true` for errors that must stop the live control loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Simulation(_) | Self::Snapshot(_) | Self::Restore(_)
        )
    }
}

impl From<ConfigError> for MpcError {
    fn from(err: ConfigError) -> Self {
        Self::Config(vec![err])
    }
}

fn join_config_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_are_the_hydraulic_ones() {
        assert!(MpcError::Simulation("boom".into()).is_fatal());
        assert!(MpcError::Snapshot("mid-step".into()).is_fatal());
        assert!(MpcError::Restore("other network".into()).is_fatal());
        assert!(!MpcError::Evaluation("bad policy".into()).is_fatal());
        assert!(!MpcError::Validation("bad id".into()).is_fatal());
    }

    #[test]
    fn shape_message_names_the_dimensions() {
        let err = MpcError::Shape {
            actual: 7,
            expected: 8,
            structures: 2,
            horizon_steps: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("7 genes"));
        assert!(msg.contains("2 structures x 4 steps"));
    }

    #[test]
    fn config_errors_are_joined() {
        let err = MpcError::Config(vec![
            ConfigError::new("control.horizon_hours", "must be > 0"),
            ConfigError::new("optimizer.generations", "must be > 0"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("control.horizon_hours"));
        assert!(msg.contains("optimizer.generations"));
    }
}
