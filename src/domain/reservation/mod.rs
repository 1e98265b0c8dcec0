//! Reservation aggregate
//!
//! Contains the Reservation entity, related types, and store interface.

pub mod model;
pub mod repository;

pub use model::{normalize_plate, Reservation, ReservationFilter, ReservationStatus};
pub use repository::{ReservationMutator, ReservationStore};
