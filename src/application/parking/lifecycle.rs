//! Reservation lifecycle manager
//!
//! Sole writer path for reservation status transitions and the spot state
//! that goes with them. Each command runs under the spot's lock and uses
//! versioned writes, retried a bounded number of times on conflict.
//!
//! Write order per command:
//! - create: claim the spot first, then append the reservation. If the
//!   append fails the claim is rolled back.
//! - activate / cancel / expire / complete: transition the reservation
//!   first (it is monotonic and decides who wins a race), then update the
//!   spot if it is still owned by that reservation. A spot left held by a
//!   terminal reservation is reclaimed by [`LifecycleManager::reclaim_orphaned_spots`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::registry::SpotRegistry;
use crate::application::events::{
    Event, ReservationActivatedEvent, ReservationCreatedEvent, SharedEventBus, SpotFreedEvent,
};
use crate::config::LifecycleConfig;
use crate::domain::events::FreeReason;
use crate::domain::reservation::{
    normalize_plate, Reservation, ReservationFilter, ReservationStatus, ReservationStore,
};
use crate::domain::spot::{Occupant, Spot, SpotAssignment, SpotFilter, SpotStatus};
use crate::domain::{DomainError, DomainResult, SettingsProvider, SharedClock, SystemToggles};
use crate::shared::{retry_with_backoff, KeyedLocks};

/// Input for [`LifecycleManager::create_reservation`]
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub spot_id: String,
    pub plate: String,
    pub customer_name: String,
    pub contact: String,
    pub duration_minutes: u32,
}

pub struct LifecycleManager {
    registry: Arc<SpotRegistry>,
    reservations: Arc<dyn ReservationStore>,
    locks: KeyedLocks,
    settings: Arc<dyn SettingsProvider>,
    events: SharedEventBus,
    clock: SharedClock,
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<SpotRegistry>,
        reservations: Arc<dyn ReservationStore>,
        locks: KeyedLocks,
        settings: Arc<dyn SettingsProvider>,
        events: SharedEventBus,
        clock: SharedClock,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            registry,
            reservations,
            locks,
            settings,
            events,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn registry(&self) -> &Arc<SpotRegistry> {
        &self.registry
    }

    // ── Commands ────────────────────────────────────────────────

    /// Hold an available spot for a plate. The reservation starts in
    /// `waiting_detection` and the spot becomes `reserved`.
    pub async fn create_reservation(&self, request: NewReservation) -> DomainResult<Reservation> {
        let plate = normalize_plate(&request.plate);
        if plate.is_empty() {
            return Err(DomainError::Validation("plate must not be empty".into()));
        }
        if request.duration_minutes == 0 {
            return Err(DomainError::Validation("duration must be at least one minute".into()));
        }

        let toggles = self.settings.toggles();
        if !toggles.accepts_reservations() {
            metrics::counter!("parking_reservations_total", "outcome" => "disabled").increment(1);
            return Err(DomainError::ServiceDisabled(
                "reservations are currently disabled".into(),
            ));
        }

        // Unknown ids never reach the lock table.
        if let Err(e) = self.registry.get(&request.spot_id).await {
            metrics::counter!("parking_reservations_total", "outcome" => "rejected").increment(1);
            return Err(e);
        }

        let request = NewReservation { plate, ..request };
        let result = retry_with_backoff(
            &self.config.retry(),
            || self.try_create(&request, &toggles),
            DomainError::is_retryable,
            "create_reservation",
        )
        .await;

        match &result {
            Ok(reservation) => {
                metrics::counter!("parking_reservations_total", "outcome" => "created").increment(1);
                info!(
                    reservation_id = %reservation.id,
                    spot_id = %reservation.spot_id,
                    plate = %reservation.plate,
                    "Reservation created"
                );
                self.events.publish(Event::ReservationCreated(ReservationCreatedEvent {
                    reservation_id: reservation.id.clone(),
                    spot_id: reservation.spot_id.clone(),
                    plate: reservation.plate.clone(),
                    timestamp: reservation.created_at,
                }));
            }
            Err(e) => {
                metrics::counter!("parking_reservations_total", "outcome" => "rejected").increment(1);
                debug!(spot_id = %request.spot_id, error = %e, "Reservation rejected");
            }
        }
        result
    }

    /// Activate the most recent `waiting_detection` reservation for `plate`.
    ///
    /// Returns `Ok(None)` when nothing is waiting for that plate or when
    /// detections are switched off.
    pub async fn activate_on_detection(
        &self,
        plate: &str,
        detected_at: DateTime<Utc>,
    ) -> DomainResult<Option<Reservation>> {
        let plate = normalize_plate(plate);
        if !self.settings.toggles().accepts_detections() {
            debug!(plate = %plate, "Detection ignored, detection disabled");
            return Ok(None);
        }

        let activated = retry_with_backoff(
            &self.config.retry(),
            || self.try_activate(&plate, detected_at),
            DomainError::is_retryable,
            "activate_on_detection",
        )
        .await?;

        match &activated {
            Some(r) => {
                let start = r.start_time.unwrap_or(detected_at);
                let end = r.end_time.unwrap_or(detected_at);
                info!(
                    reservation_id = %r.id,
                    spot_id = %r.spot_id,
                    plate = %r.plate,
                    end_time = %end,
                    "Reservation activated on detection"
                );
                self.events.publish(Event::ReservationActivated(ReservationActivatedEvent {
                    reservation_id: r.id.clone(),
                    spot_id: r.spot_id.clone(),
                    plate: r.plate.clone(),
                    start_time: start,
                    end_time: end,
                }));
            }
            None => debug!(plate = %plate, "Detection without waiting reservation ignored"),
        }
        Ok(activated)
    }

    /// Cancel a waiting or active reservation and free its spot.
    pub async fn cancel_reservation(
        &self,
        reservation_id: &str,
        reason: &str,
    ) -> DomainResult<Reservation> {
        let now = self.clock.now();
        let reason_owned = reason.to_string();
        self.release(reservation_id, FreeReason::Cancelled, move |r| {
            r.cancel(reason_owned.clone(), now)
        })
        .await
    }

    /// Expire a `waiting_detection` reservation older than the waiting timeout.
    ///
    /// Not yet overdue, or already expired: `Ok(None)`, nothing changes.
    /// Any other status: `InvalidTransition`.
    pub async fn expire_if_overdue(
        &self,
        reservation_id: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<Reservation>> {
        let timeout = self.config.waiting_timeout();
        let current = self.reservations.get(reservation_id).await?;
        match current.status {
            ReservationStatus::Expired => return Ok(None),
            ReservationStatus::WaitingDetection => {}
            other => {
                return Err(DomainError::InvalidTransition {
                    reservation_id: reservation_id.to_string(),
                    from: other.to_string(),
                    action: "expire",
                })
            }
        }
        if !current.is_overdue(now, timeout) {
            return Ok(None);
        }

        match self
            .release(reservation_id, FreeReason::Expired, move |r| {
                if !r.is_overdue(now, timeout) {
                    return Err(DomainError::InvalidTransition {
                        reservation_id: r.id.clone(),
                        from: r.status.to_string(),
                        action: "expire",
                    });
                }
                r.expire(now)
            })
            .await
        {
            Ok(r) => Ok(Some(r)),
            // Someone else expired it between our read and the lock.
            Err(DomainError::InvalidTransition { from, .. })
                if from == ReservationStatus::Expired.as_str() =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Close an active reservation (vehicle left) and free its spot.
    pub async fn complete_reservation(&self, reservation_id: &str) -> DomainResult<Reservation> {
        let now = self.clock.now();
        self.release(reservation_id, FreeReason::Completed, move |r| r.complete(now))
            .await
    }

    // ── Queries ─────────────────────────────────────────────────

    pub async fn get_reservation(&self, reservation_id: &str) -> DomainResult<Reservation> {
        self.reservations.get(reservation_id).await
    }

    pub async fn list_reservations(
        &self,
        filter: &ReservationFilter,
    ) -> DomainResult<Vec<Reservation>> {
        self.reservations.list(filter).await
    }

    /// Most recent reservation for a plate, any status
    pub async fn latest_for_plate(&self, plate: &str) -> DomainResult<Option<Reservation>> {
        let filter = ReservationFilter {
            plate: Some(normalize_plate(plate)),
            ..Default::default()
        };
        Ok(self.reservations.list(&filter).await?.into_iter().last())
    }

    /// Spot and its owning reservation, read together under the spot lock.
    pub async fn spot_view(&self, spot_id: &str) -> DomainResult<(Spot, Option<Reservation>)> {
        self.registry.get(spot_id).await?;
        let _guard = self.locks.acquire(spot_id, self.config.lock_timeout()).await?;
        let spot = self.registry.get(spot_id).await?;
        let owner = match spot.reservation_id.as_deref() {
            Some(id) => Some(self.reservations.get(id).await?),
            None => None,
        };
        Ok((spot, owner))
    }

    /// Free spots still held by a reservation that already reached a
    /// terminal state. Returns the number of spots freed.
    pub async fn reclaim_orphaned_spots(&self) -> DomainResult<usize> {
        let mut held = self.registry.list(&SpotFilter::with_status(SpotStatus::Reserved)).await?;
        held.extend(self.registry.list(&SpotFilter::with_status(SpotStatus::Occupied)).await?);

        let mut reclaimed = 0;
        for spot in held {
            let Some(owner_id) = spot.reservation_id.clone() else {
                continue;
            };
            let owner = match self.reservations.get(&owner_id).await {
                Ok(r) => r,
                Err(DomainError::RecordNotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            if !owner.status.is_terminal() {
                continue;
            }

            let _guard = self.locks.acquire(&spot.id, self.config.lock_timeout()).await?;
            if self.free_spot(&spot.id, &owner_id).await? {
                warn!(spot_id = %spot.id, reservation_id = %owner_id, "Reclaimed orphaned spot hold");
                self.publish_freed(&spot.id, &owner_id, reason_for(owner.status));
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    // ── Internals ───────────────────────────────────────────────

    async fn try_create(
        &self,
        request: &NewReservation,
        toggles: &SystemToggles,
    ) -> DomainResult<Reservation> {
        let _guard = self
            .locks
            .acquire(&request.spot_id, self.config.lock_timeout())
            .await?;

        let spot = self.registry.get(&request.spot_id).await?;
        if toggles.zone_disabled(&spot.zone) {
            return Err(DomainError::spot_unavailable(
                &spot.id,
                format!("zone {} is closed for reservations", spot.zone),
            ));
        }
        if !spot.is_available() {
            return Err(DomainError::spot_unavailable(&spot.id, spot.status.as_str()));
        }

        let open = self
            .reservations
            .list(&ReservationFilter::for_spot(&spot.id))
            .await?
            .into_iter()
            .any(|r| r.status.is_open());
        if open {
            return Err(DomainError::spot_unavailable(
                &spot.id,
                "spot already has an open reservation",
            ));
        }

        let now = self.clock.now();
        let reservation = Reservation::new(
            &spot.id,
            &request.plate,
            &request.customer_name,
            &request.contact,
            request.duration_minutes,
            now,
        );

        let occupant = Occupant {
            plate: reservation.plate.clone(),
            name: reservation.customer_name.clone(),
        };
        let claimed = self
            .registry
            .set_status(
                &spot.id,
                SpotAssignment::held(
                    SpotStatus::Reserved,
                    occupant,
                    &reservation.id,
                    now + self.config.waiting_timeout(),
                ),
                spot.version,
            )
            .await?;

        if let Err(e) = self.reservations.append(reservation.clone()).await {
            if let Err(rollback) = self
                .registry
                .set_status(&spot.id, SpotAssignment::vacant(), claimed.version)
                .await
            {
                error!(
                    spot_id = %spot.id,
                    reservation_id = %reservation.id,
                    error = %rollback,
                    "Failed to roll back spot claim"
                );
            }
            return Err(e);
        }

        Ok(reservation)
    }

    async fn try_activate(
        &self,
        plate: &str,
        detected_at: DateTime<Utc>,
    ) -> DomainResult<Option<Reservation>> {
        let filter = ReservationFilter {
            plate: Some(plate.to_string()),
            status: Some(ReservationStatus::WaitingDetection),
            spot_id: None,
        };
        let Some(candidate) = self.reservations.list(&filter).await?.into_iter().last() else {
            return Ok(None);
        };

        let _guard = self
            .locks
            .acquire(&candidate.spot_id, self.config.lock_timeout())
            .await?;

        let current = self.reservations.get(&candidate.id).await?;
        if current.status != ReservationStatus::WaitingDetection {
            // Lost a race; look again for another waiting reservation.
            return Err(DomainError::conflict("reservation", &current.id));
        }

        let window = self.config.active_duration();
        let activated = self
            .reservations
            .compare_and_update(
                &current.id,
                current.version,
                Box::new(move |r: &mut Reservation| r.activate(detected_at, window)),
            )
            .await?;

        let end_time = activated.end_time.unwrap_or(detected_at + window);
        if let Err(e) = self.occupy_spot(&activated, end_time).await {
            error!(
                spot_id = %activated.spot_id,
                reservation_id = %activated.id,
                error = %e,
                "Reservation activated but spot could not be marked occupied"
            );
        }

        Ok(Some(activated))
    }

    async fn release<F>(
        &self,
        reservation_id: &str,
        reason: FreeReason,
        transition: F,
    ) -> DomainResult<Reservation>
    where
        F: Fn(&mut Reservation) -> DomainResult<()> + Clone + Send + 'static,
    {
        let result = retry_with_backoff(
            &self.config.retry(),
            || self.try_release(reservation_id, transition.clone()),
            DomainError::is_retryable,
            reason.as_str(),
        )
        .await;

        match result {
            Ok((reservation, freed)) => {
                info!(
                    reservation_id = %reservation.id,
                    spot_id = %reservation.spot_id,
                    status = %reservation.status,
                    "Reservation closed"
                );
                if freed {
                    self.publish_freed(&reservation.spot_id, &reservation.id, reason);
                }
                Ok(reservation)
            }
            Err(e) => {
                if e.is_expected_race() {
                    debug!(reservation_id, error = %e, "Transition rejected");
                } else {
                    warn!(reservation_id, error = %e, "Transition failed");
                }
                Err(e)
            }
        }
    }

    async fn try_release<F>(
        &self,
        reservation_id: &str,
        transition: F,
    ) -> DomainResult<(Reservation, bool)>
    where
        F: FnOnce(&mut Reservation) -> DomainResult<()> + Send + 'static,
    {
        let snapshot = self.reservations.get(reservation_id).await?;
        let _guard = self
            .locks
            .acquire(&snapshot.spot_id, self.config.lock_timeout())
            .await?;

        let current = self.reservations.get(reservation_id).await?;
        let closed = self
            .reservations
            .compare_and_update(&current.id, current.version, Box::new(transition))
            .await?;

        // The transition is committed; a failed spot write is repaired later.
        let freed = match self.free_spot(&closed.spot_id, &closed.id).await {
            Ok(freed) => freed,
            Err(e) => {
                error!(
                    spot_id = %closed.spot_id,
                    reservation_id = %closed.id,
                    error = %e,
                    "Reservation closed but spot could not be freed"
                );
                false
            }
        };
        Ok((closed, freed))
    }

    /// Set the spot to `available` if `reservation_id` still owns it.
    async fn free_spot(&self, spot_id: &str, reservation_id: &str) -> DomainResult<bool> {
        retry_with_backoff(
            &self.config.retry(),
            || self.try_free_spot(spot_id, reservation_id),
            DomainError::is_retryable,
            "free_spot",
        )
        .await
    }

    async fn try_free_spot(&self, spot_id: &str, reservation_id: &str) -> DomainResult<bool> {
        let spot = self.registry.get(spot_id).await?;
        if spot.reservation_id.as_deref() != Some(reservation_id) {
            warn!(
                spot_id,
                reservation_id,
                owner = ?spot.reservation_id,
                "Spot no longer owned by reservation, leaving it as is"
            );
            return Ok(false);
        }
        self.registry
            .set_status(spot_id, SpotAssignment::vacant(), spot.version)
            .await?;
        Ok(true)
    }

    async fn occupy_spot(&self, reservation: &Reservation, until: DateTime<Utc>) -> DomainResult<()> {
        retry_with_backoff(
            &self.config.retry(),
            || self.try_occupy_spot(reservation, until),
            DomainError::is_retryable,
            "occupy_spot",
        )
        .await
    }

    async fn try_occupy_spot(&self, reservation: &Reservation, until: DateTime<Utc>) -> DomainResult<()> {
        let spot = self.registry.get(&reservation.spot_id).await?;
        if spot.reservation_id.as_deref() != Some(reservation.id.as_str()) {
            return Err(DomainError::spot_unavailable(
                &spot.id,
                "spot is no longer held by this reservation",
            ));
        }
        let occupant = Occupant {
            plate: reservation.plate.clone(),
            name: reservation.customer_name.clone(),
        };
        self.registry
            .set_status(
                &spot.id,
                SpotAssignment::held(SpotStatus::Occupied, occupant, &reservation.id, until),
                spot.version,
            )
            .await?;
        Ok(())
    }

    fn publish_freed(&self, spot_id: &str, reservation_id: &str, reason: FreeReason) {
        metrics::counter!("parking_spot_freed_total", "reason" => reason.as_str()).increment(1);
        self.events.publish(Event::SpotFreed(SpotFreedEvent {
            spot_id: spot_id.to_string(),
            reservation_id: Some(reservation_id.to_string()),
            reason,
            timestamp: self.clock.now(),
        }));
    }
}

fn reason_for(status: ReservationStatus) -> FreeReason {
    match status {
        ReservationStatus::Expired => FreeReason::Expired,
        ReservationStatus::Completed => FreeReason::Completed,
        _ => FreeReason::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::parking::test_support::Harness;
    use crate::domain::Clock;
    use chrono::Duration;

    #[tokio::test]
    async fn create_reserves_spot_and_waits_for_detection() {
        let h = Harness::with_spots(&["S1"]).await;

        let r = h.reserve("S1", "xyz-9").await.unwrap();

        assert_eq!(r.status, ReservationStatus::WaitingDetection);
        assert_eq!(r.plate, "XYZ-9");
        let spot = h.registry.get("S1").await.unwrap();
        assert_eq!(spot.status, SpotStatus::Reserved);
        assert_eq!(spot.occupant_plate(), Some("XYZ-9"));
        assert_eq!(spot.reservation_id.as_deref(), Some(r.id.as_str()));
    }

    #[tokio::test]
    async fn create_on_held_spot_is_rejected_without_changes() {
        let h = Harness::with_spots(&["S1"]).await;
        let first = h.reserve("S1", "AAA").await.unwrap();
        let before = h.registry.get("S1").await.unwrap();

        let err = h.reserve("S1", "BBB").await.unwrap_err();
        assert!(matches!(err, DomainError::SpotUnavailable { .. }));

        assert_eq!(h.registry.get("S1").await.unwrap(), before);
        let all = h.lifecycle.list_reservations(&ReservationFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, first.id);

        h.lifecycle.activate_on_detection("AAA", h.clock.now()).await.unwrap();
        let err = h.reserve("S1", "CCC").await.unwrap_err();
        assert!(matches!(err, DomainError::SpotUnavailable { .. }));
    }

    #[tokio::test]
    async fn create_on_unknown_spot_is_not_found() {
        let h = Harness::with_spots(&[]).await;
        let err = h.reserve("S9", "AAA").await.unwrap_err();
        assert!(matches!(err, DomainError::RecordNotFound { .. }));
    }

    #[tokio::test]
    async fn create_respects_toggles() {
        let h = Harness::with_spots(&["A1", "B1"]).await;
        h.settings.replace(SystemToggles {
            disabled_zones: vec!["B".into()],
            ..Default::default()
        });
        let err = h.reserve("B1", "AAA").await.unwrap_err();
        assert!(matches!(err, DomainError::SpotUnavailable { .. }));

        h.settings.replace(SystemToggles {
            reservations_enabled: false,
            ..Default::default()
        });
        let err = h.reserve("A1", "AAA").await.unwrap_err();
        assert!(matches!(err, DomainError::ServiceDisabled(_)));
        assert!(h.registry.get("A1").await.unwrap().is_available());
    }

    #[tokio::test]
    async fn detection_activates_with_fixed_window() {
        let h = Harness::with_spots(&["S1"]).await;
        let r = h.reserve("S1", "XYZ-9").await.unwrap();
        let seen = r.created_at + Duration::minutes(2);

        let activated = h.lifecycle.activate_on_detection("xyz-9", seen).await.unwrap().unwrap();

        assert_eq!(activated.status, ReservationStatus::Active);
        assert_eq!(activated.start_time, Some(seen));
        assert_eq!(activated.end_time, Some(seen + Duration::minutes(15)));
        assert_eq!(h.registry.get("S1").await.unwrap().status, SpotStatus::Occupied);

        // Second detection has nothing left to activate.
        let again = h.lifecycle.activate_on_detection("XYZ-9", seen).await.unwrap();
        assert!(again.is_none());
        let stored = h.lifecycle.get_reservation(&r.id).await.unwrap();
        assert_eq!(stored.start_time, Some(seen));
    }

    #[tokio::test]
    async fn detection_ignored_when_disabled() {
        let h = Harness::with_spots(&["S1"]).await;
        let r = h.reserve("S1", "XYZ-9").await.unwrap();
        h.settings.replace(SystemToggles {
            detection_enabled: false,
            ..Default::default()
        });

        assert!(h.lifecycle.activate_on_detection("XYZ-9", h.clock.now()).await.unwrap().is_none());
        let stored = h.lifecycle.get_reservation(&r.id).await.unwrap();
        assert_eq!(stored.status, ReservationStatus::WaitingDetection);
    }

    #[tokio::test]
    async fn cancel_frees_spot_and_publishes_event() {
        let h = Harness::with_spots(&["S1"]).await;
        let mut events = h.bus.subscribe();
        let r = h.reserve("S1", "AAA").await.unwrap();

        let cancelled = h.lifecycle.cancel_reservation(&r.id, "changed plans").await.unwrap();

        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert_eq!(cancelled.cancel_reason.as_deref(), Some("changed plans"));
        assert!(h.registry.get("S1").await.unwrap().is_available());
        assert_eq!(h.next_freed(&mut events).await.reason, FreeReason::Cancelled);

        let err = h.lifecycle.cancel_reservation(&r.id, "again").await.unwrap_err();
        assert!(err.is_expected_race());
    }

    #[tokio::test]
    async fn expire_respects_timeout_boundaries() {
        let h = Harness::with_spots(&["S1"]).await;
        let r = h.reserve("S1", "ABC-1").await.unwrap();

        let early = h
            .lifecycle
            .expire_if_overdue(&r.id, r.created_at + Duration::minutes(29))
            .await
            .unwrap();
        assert!(early.is_none());
        assert_eq!(h.registry.get("S1").await.unwrap().status, SpotStatus::Reserved);

        let expired = h
            .lifecycle
            .expire_if_overdue(&r.id, r.created_at + Duration::minutes(31))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(expired.status, ReservationStatus::Expired);
        assert!(h.registry.get("S1").await.unwrap().is_available());
    }

    #[tokio::test]
    async fn expire_twice_is_a_silent_noop() {
        let h = Harness::with_spots(&["S1"]).await;
        let mut events = h.bus.subscribe();
        let r = h.reserve("S1", "ABC-1").await.unwrap();
        let later = r.created_at + Duration::minutes(31);

        assert!(h.lifecycle.expire_if_overdue(&r.id, later).await.unwrap().is_some());
        let after_first = h.registry.get("S1").await.unwrap();
        assert!(h.lifecycle.expire_if_overdue(&r.id, later).await.unwrap().is_none());

        assert_eq!(h.registry.get("S1").await.unwrap(), after_first);
        assert_eq!(h.next_freed(&mut events).await.reason, FreeReason::Expired);
        assert!(h.try_next_freed(&mut events).await.is_none());
    }

    #[tokio::test]
    async fn expire_on_active_is_invalid() {
        let h = Harness::with_spots(&["S1"]).await;
        let r = h.reserve("S1", "ABC-1").await.unwrap();
        h.lifecycle.activate_on_detection("ABC-1", h.clock.now()).await.unwrap();

        let err = h
            .lifecycle
            .expire_if_overdue(&r.id, r.created_at + Duration::hours(2))
            .await
            .unwrap_err();
        assert!(err.is_expected_race());
        assert_eq!(h.registry.get("S1").await.unwrap().status, SpotStatus::Occupied);
    }

    #[tokio::test]
    async fn complete_only_from_active() {
        let h = Harness::with_spots(&["S1"]).await;
        let r = h.reserve("S1", "ABC-1").await.unwrap();

        assert!(h.lifecycle.complete_reservation(&r.id).await.unwrap_err().is_expected_race());

        h.lifecycle.activate_on_detection("ABC-1", h.clock.now()).await.unwrap();
        let done = h.lifecycle.complete_reservation(&r.id).await.unwrap();
        assert_eq!(done.status, ReservationStatus::Completed);
        assert!(h.registry.get("S1").await.unwrap().is_available());
    }

    #[tokio::test]
    async fn unknown_reservation_is_not_found() {
        let h = Harness::with_spots(&["S1"]).await;
        let err = h.lifecycle.cancel_reservation("nope", "x").await.unwrap_err();
        assert!(matches!(err, DomainError::RecordNotFound { .. }));
    }

    #[tokio::test]
    async fn concurrent_creates_on_one_spot_book_it_once() {
        let h = Harness::with_spots(&["S1"]).await;

        let mut tasks = Vec::new();
        for i in 0..8 {
            let lifecycle = h.lifecycle.clone();
            tasks.push(tokio::spawn(async move {
                lifecycle
                    .create_reservation(NewReservation {
                        spot_id: "S1".into(),
                        plate: format!("CAR-{i}"),
                        customer_name: "n".into(),
                        contact: "c".into(),
                        duration_minutes: 30,
                    })
                    .await
            }));
        }

        let mut successes = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);

        let open: Vec<_> = h
            .lifecycle
            .list_reservations(&ReservationFilter::for_spot("S1"))
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.status.is_open())
            .collect();
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn racing_cancel_and_expire_close_once() {
        let h = Harness::with_spots(&["S1"]).await;
        let mut events = h.bus.subscribe();
        let r = h.reserve("S1", "ABC-1").await.unwrap();
        let later = r.created_at + Duration::minutes(31);

        let (a, b) = tokio::join!(
            h.lifecycle.cancel_reservation(&r.id, "user"),
            h.lifecycle.expire_if_overdue(&r.id, later)
        );

        let closed = usize::from(a.is_ok()) + usize::from(matches!(b, Ok(Some(_))));
        assert_eq!(closed, 1);
        h.next_freed(&mut events).await;
        assert!(h.try_next_freed(&mut events).await.is_none());
    }

    #[tokio::test]
    async fn orphaned_hold_is_reclaimed() {
        let h = Harness::with_spots(&["S1"]).await;
        let r = h.reserve("S1", "ABC-1").await.unwrap();

        // Close the reservation behind the lifecycle's back.
        h.reservations
            .compare_and_update(&r.id, r.version, Box::new(|r: &mut Reservation| r.cancel("external", Utc::now())))
            .await
            .unwrap();

        assert_eq!(h.lifecycle.reclaim_orphaned_spots().await.unwrap(), 1);
        assert!(h.registry.get("S1").await.unwrap().is_available());
        assert_eq!(h.lifecycle.reclaim_orphaned_spots().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_spot_ids_leave_no_lock_behind() {
        let h = Harness::with_spots(&["S1"]).await;

        for i in 0..20 {
            let err = h.reserve(&format!("NOPE-{i}"), "ABC-1").await.unwrap_err();
            assert!(matches!(err, DomainError::RecordNotFound { .. }));
            assert!(h.lifecycle.spot_view(&format!("GONE-{i}")).await.is_err());
        }
        assert!(h.locks.is_empty());

        h.reserve("S1", "ABC-1").await.unwrap();
        assert_eq!(h.locks.len(), 1);
    }

    #[tokio::test]
    async fn spot_view_returns_owner() {
        let h = Harness::with_spots(&["S1"]).await;
        let r = h.reserve("S1", "ABC-1").await.unwrap();

        let (spot, owner) = h.lifecycle.spot_view("S1").await.unwrap();
        assert_eq!(spot.status, SpotStatus::Reserved);
        assert_eq!(owner.unwrap().id, r.id);
        assert_eq!(h.lifecycle.latest_for_plate("abc-1").await.unwrap().unwrap().id, r.id);
    }
}
