//! Spot registry: canonical per-spot state behind versioned writes.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::domain::spot::{Spot, SpotAssignment, SpotFilter, SpotStatus, SpotStore};
use crate::domain::{normalize_plate, DomainError, DomainResult, SharedClock};

/// Spot counts by status
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OccupancySummary {
    pub total: usize,
    pub available: usize,
    pub reserved: usize,
    pub occupied: usize,
    pub maintenance: usize,
}

impl OccupancySummary {
    /// Share of spots that are reserved or occupied, 0.0 for an empty lot.
    pub fn occupancy_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.reserved + self.occupied) as f64 / self.total as f64
        }
    }
}

pub struct SpotRegistry {
    store: Arc<dyn SpotStore>,
    clock: SharedClock,
}

impl SpotRegistry {
    pub fn new(store: Arc<dyn SpotStore>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Add a spot. Held statuses are refused since there is no owner yet.
    pub async fn register(&self, id: &str, zone: &str, status: SpotStatus) -> DomainResult<Spot> {
        if status.is_held() {
            return Err(DomainError::Validation(format!(
                "spot {id} cannot be registered as {status}"
            )));
        }
        let mut spot = Spot::new(id, zone, self.clock.now());
        spot.status = status;
        self.store.insert(spot.clone()).await?;
        debug!(spot_id = %id, zone = %zone, status = %status, "Spot registered");
        Ok(spot)
    }

    pub async fn get(&self, id: &str) -> DomainResult<Spot> {
        self.store.get(id).await
    }

    pub async fn list(&self, filter: &SpotFilter) -> DomainResult<Vec<Spot>> {
        self.store.list(filter).await
    }

    /// The only spot mutator. Fails with `ConcurrentModification` if the
    /// spot changed since `expected_version` was read.
    pub async fn set_status(
        &self,
        id: &str,
        assignment: SpotAssignment,
        expected_version: u64,
    ) -> DomainResult<Spot> {
        let has_plate = assignment
            .occupant
            .as_ref()
            .is_some_and(|o| !normalize_plate(&o.plate).is_empty());
        if assignment.status.is_held() && !has_plate {
            return Err(DomainError::Validation(format!(
                "spot {id} cannot be {} without an occupant plate",
                assignment.status
            )));
        }

        let now = self.clock.now();
        let updated = self
            .store
            .compare_and_update(
                id,
                expected_version,
                Box::new(move |spot: &mut Spot| spot.apply(assignment, now)),
            )
            .await?;

        debug!(
            spot_id = %id,
            status = %updated.status,
            version = updated.version,
            "Spot status updated"
        );
        Ok(updated)
    }

    pub async fn summary(&self) -> DomainResult<OccupancySummary> {
        let spots = self.store.list(&SpotFilter::default()).await?;
        let mut summary = OccupancySummary {
            total: spots.len(),
            ..Default::default()
        };
        for spot in &spots {
            match spot.status {
                SpotStatus::Available => summary.available += 1,
                SpotStatus::Reserved => summary.reserved += 1,
                SpotStatus::Occupied => summary.occupied += 1,
                SpotStatus::Maintenance => summary.maintenance += 1,
            }
        }
        Ok(summary)
    }
}
