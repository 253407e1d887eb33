//! Receding-horizon model predictive control.

pub mod control_loop;
pub mod cost;
/// Committed control decisions.
pub mod history;
/// Selection, crossover and mutation on integer chromosomes.
pub mod operators;
pub mod optimizer;
pub mod policy;
pub mod report;

pub use control_loop::{ControlLoop, ControlSettings, LoopState, MpcRun, TickReport};
pub use cost::{CostEvaluator, CostWeights, DepthTarget, HorizonObjective, policy_cost};
pub use history::{ControlHistory, ControlRecord};
pub use optimizer::{GaSettings, GeneticOptimizer, OptimizationResult, PolicySearch};
pub use policy::{ControlPolicy, PolicyEncoder};
pub use report::RunReport;
