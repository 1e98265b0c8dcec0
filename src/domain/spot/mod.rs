//! Spot aggregate
//!
//! Contains the Spot entity, related types, and store interface.

pub mod model;
pub mod repository;

pub use model::{Occupant, Spot, SpotAssignment, SpotFilter, SpotStatus};
pub use repository::{SpotMutator, SpotStore};
