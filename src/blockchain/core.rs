// core.rs splits chain management from block validation.
pub mod chain;
pub mod validation;

pub use chain::*;
pub use validation::*;
