//! Spot store interface

use async_trait::async_trait;

use super::model::{Spot, SpotFilter};
use crate::domain::DomainResult;

/// In-place edit applied by [`SpotStore::compare_and_update`].
pub type SpotMutator = Box<dyn FnOnce(&mut Spot) + Send>;

#[async_trait]
pub trait SpotStore: Send + Sync {
    /// Register a new spot. Fails if the id is taken.
    async fn insert(&self, spot: Spot) -> DomainResult<()>;

    /// Fetch a spot, `RecordNotFound` if unknown
    async fn get(&self, id: &str) -> DomainResult<Spot>;

    /// List spots matching the filter, ordered by id
    async fn list(&self, filter: &SpotFilter) -> DomainResult<Vec<Spot>>;

    /// Apply `mutator` only if the stored version equals `expected_version`.
    ///
    /// Returns the updated spot with its new version, or
    /// `ConcurrentModification` if the version moved.
    async fn compare_and_update(
        &self,
        id: &str,
        expected_version: u64,
        mutator: SpotMutator,
    ) -> DomainResult<Spot>;
}
