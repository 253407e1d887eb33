//! Network definitions and the lumped reference simulator.

pub mod definition;
pub mod model;

pub use definition::NetworkDefinition;
pub use model::{LumpedNetwork, NetworkSnapshot};
