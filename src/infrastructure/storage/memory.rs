//! In-memory storage implementation
//!
//! Versioned per-key records in `DashMap`s. Every write goes through a
//! compare-and-update on the record's version stamp, so callers on other
//! tasks or threads sharing the same instance see either the old or the new
//! record, never a half-applied one.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::domain::audit::{AuditLog, SpotOverrideEntry, SystemActionEntry};
use crate::domain::reservation::{
    Reservation, ReservationFilter, ReservationMutator, ReservationStore,
};
use crate::domain::spot::{Spot, SpotFilter, SpotMutator, SpotStore};
use crate::domain::waitlist::{WaitlistEntry, WaitlistQueue};
use crate::domain::{DomainError, DomainResult};

// ── Spots ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemorySpotStore {
    spots: DashMap<String, Spot>,
}

impl InMemorySpotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SpotStore for InMemorySpotStore {
    async fn insert(&self, spot: Spot) -> DomainResult<()> {
        match self.spots.entry(spot.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(DomainError::Storage(format!(
                "spot {} already exists",
                spot.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(spot);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> DomainResult<Spot> {
        self.spots
            .get(id)
            .map(|s| s.clone())
            .ok_or_else(|| DomainError::not_found("spot", id))
    }

    async fn list(&self, filter: &SpotFilter) -> DomainResult<Vec<Spot>> {
        let mut spots: Vec<Spot> = self
            .spots
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        spots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(spots)
    }

    async fn compare_and_update(
        &self,
        id: &str,
        expected_version: u64,
        mutator: SpotMutator,
    ) -> DomainResult<Spot> {
        let mut entry = self
            .spots
            .get_mut(id)
            .ok_or_else(|| DomainError::not_found("spot", id))?;

        if entry.version != expected_version {
            return Err(DomainError::conflict("spot", id));
        }

        let mut next = entry.clone();
        mutator(&mut next);
        next.id = entry.id.clone();
        next.version = expected_version + 1;
        *entry = next.clone();
        Ok(next)
    }
}

// ── Reservations ────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryReservationStore {
    reservations: DashMap<String, Reservation>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn append(&self, reservation: Reservation) -> DomainResult<()> {
        match self.reservations.entry(reservation.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(DomainError::conflict("reservation", reservation.id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(reservation);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> DomainResult<Reservation> {
        self.reservations
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| DomainError::not_found("reservation", id))
    }

    async fn list(&self, filter: &ReservationFilter) -> DomainResult<Vec<Reservation>> {
        let mut reservations: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        reservations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(reservations)
    }

    async fn compare_and_update(
        &self,
        id: &str,
        expected_version: u64,
        mutator: ReservationMutator,
    ) -> DomainResult<Reservation> {
        let mut entry = self
            .reservations
            .get_mut(id)
            .ok_or_else(|| DomainError::not_found("reservation", id))?;

        if entry.version != expected_version {
            return Err(DomainError::conflict("reservation", id));
        }

        let mut next = entry.clone();
        mutator(&mut next)?;
        next.id = entry.id.clone();
        next.version = expected_version + 1;
        *entry = next.clone();
        Ok(next)
    }
}

// ── Waitlist ────────────────────────────────────────────────────

/// Queue keyed by `(requested_at, arrival sequence)` behind a single mutex,
/// which makes `pop_oldest` exclusive.
#[derive(Default)]
pub struct InMemoryWaitlist {
    entries: Mutex<BTreeMap<(DateTime<Utc>, u64), WaitlistEntry>>,
    sequence: AtomicU64,
}

impl InMemoryWaitlist {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> DomainResult<std::sync::MutexGuard<'_, BTreeMap<(DateTime<Utc>, u64), WaitlistEntry>>>
    {
        self.entries
            .lock()
            .map_err(|_| DomainError::Storage("waitlist lock poisoned".into()))
    }
}

#[async_trait]
impl WaitlistQueue for InMemoryWaitlist {
    async fn push(&self, mut entry: WaitlistEntry) -> DomainResult<WaitlistEntry> {
        entry.sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.lock()?
            .insert((entry.requested_at, entry.sequence), entry.clone());
        Ok(entry)
    }

    async fn restore(&self, entry: WaitlistEntry) -> DomainResult<()> {
        self.lock()?.insert((entry.requested_at, entry.sequence), entry);
        Ok(())
    }

    async fn pop_oldest(&self) -> DomainResult<Option<WaitlistEntry>> {
        Ok(self.lock()?.pop_first().map(|(_, entry)| entry))
    }

    async fn list(&self) -> DomainResult<Vec<WaitlistEntry>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    async fn len(&self) -> DomainResult<usize> {
        Ok(self.lock()?.len())
    }
}

// ── Audit ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryAuditLog {
    overrides: RwLock<Vec<SpotOverrideEntry>>,
    system_actions: RwLock<Vec<SystemActionEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn record_override(&self, entry: SpotOverrideEntry) -> DomainResult<()> {
        self.overrides.write().await.push(entry);
        Ok(())
    }

    async fn record_system_action(&self, entry: SystemActionEntry) -> DomainResult<()> {
        self.system_actions.write().await.push(entry);
        Ok(())
    }

    async fn overrides(&self) -> DomainResult<Vec<SpotOverrideEntry>> {
        Ok(self.overrides.read().await.clone())
    }

    async fn system_actions(&self) -> DomainResult<Vec<SystemActionEntry>> {
        Ok(self.system_actions.read().await.clone())
    }
}
