//! Receding-horizon model predictive control for stormwater drainage networks.

pub mod cli;
pub mod config;
pub mod error;
/// Result file export.
pub mod io {
    pub mod export;
}
/// Receding-horizon control: policy encoding, cost, search and the control loop.
pub mod mpc;
pub mod network;
pub mod presets;
pub mod runner;
/// Simulator boundary, control clock and state readings.
pub mod sim;
