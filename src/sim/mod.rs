/// Simulator boundary used by the control loop.
pub mod adapter;
/// Control-interval clock.
pub mod clock;
pub mod types;

pub use adapter::{Simulator, resolve_structures};
pub use types::SimulationState;
