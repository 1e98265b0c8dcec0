//! Store implementations

mod memory;

pub use memory::{InMemoryAuditLog, InMemoryReservationStore, InMemorySpotStore, InMemoryWaitlist};
