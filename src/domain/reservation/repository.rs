//! Reservation store interface

use async_trait::async_trait;

use super::model::{Reservation, ReservationFilter};
use crate::domain::DomainResult;

/// In-place edit applied by [`ReservationStore::compare_and_update`].
pub type ReservationMutator = Box<dyn FnOnce(&mut Reservation) -> DomainResult<()> + Send>;

/// Append-only history of reservations. Records are never deleted.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Store a new reservation. Fails if the id already exists.
    async fn append(&self, reservation: Reservation) -> DomainResult<()>;

    /// Fetch a reservation, `RecordNotFound` if unknown
    async fn get(&self, id: &str) -> DomainResult<Reservation>;

    /// List reservations matching the filter, oldest first
    async fn list(&self, filter: &ReservationFilter) -> DomainResult<Vec<Reservation>>;

    /// Apply `mutator` only if the stored version equals `expected_version`.
    ///
    /// A mutator error leaves the record untouched and is returned as-is.
    async fn compare_and_update(
        &self,
        id: &str,
        expected_version: u64,
        mutator: ReservationMutator,
    ) -> DomainResult<Reservation>;
}
