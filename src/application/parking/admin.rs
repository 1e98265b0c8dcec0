//! Operator actions outside the reservation lifecycle
//!
//! Forced spot status changes and toggle updates. Every action is written
//! to the audit log.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::registry::SpotRegistry;
use crate::application::events::{Event, SharedEventBus, SpotFreedEvent, SpotOverriddenEvent};
use crate::domain::audit::{AuditLog, SpotOverrideEntry, SystemActionEntry};
use crate::domain::events::FreeReason;
use crate::domain::reservation::{normalize_plate, Reservation, ReservationStore};
use crate::domain::spot::{Occupant, Spot, SpotAssignment, SpotStatus};
use crate::domain::{DomainError, DomainResult, SettingsProvider, SharedClock, SharedSettings, SystemToggles};
use crate::shared::KeyedLocks;

pub struct AdminService {
    registry: Arc<SpotRegistry>,
    reservations: Arc<dyn ReservationStore>,
    audit: Arc<dyn AuditLog>,
    settings: SharedSettings,
    locks: KeyedLocks,
    events: SharedEventBus,
    clock: SharedClock,
    lock_timeout: Duration,
}

impl AdminService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<SpotRegistry>,
        reservations: Arc<dyn ReservationStore>,
        audit: Arc<dyn AuditLog>,
        settings: SharedSettings,
        locks: KeyedLocks,
        events: SharedEventBus,
        clock: SharedClock,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            reservations,
            audit,
            settings,
            locks,
            events,
            clock,
            lock_timeout,
        }
    }

    /// Set a spot's status directly.
    ///
    /// An open reservation that owned the spot is cancelled first so the
    /// spot never points at a reservation it no longer belongs to.
    pub async fn force_set_spot_status(
        &self,
        actor: &str,
        spot_id: &str,
        status: SpotStatus,
        occupant: Option<Occupant>,
        reason: &str,
    ) -> DomainResult<Spot> {
        if actor.trim().is_empty() {
            return Err(DomainError::Validation("actor must not be empty".into()));
        }
        let occupant = if status.is_held() {
            let Some(occupant) = occupant.filter(|o| !normalize_plate(&o.plate).is_empty()) else {
                return Err(DomainError::Validation(format!(
                    "{status} requires occupant plate and name"
                )));
            };
            Some(occupant)
        } else {
            None
        };

        self.registry.get(spot_id).await?;
        let _guard = self.locks.acquire(spot_id, self.lock_timeout).await?;
        let spot = self.registry.get(spot_id).await?;
        let now = self.clock.now();

        if let Some(owner_id) = spot.reservation_id.as_deref() {
            self.detach_owner(owner_id, actor, reason).await?;
        }

        let assignment = SpotAssignment {
            status,
            occupant,
            reservation_id: None,
            reserved_until: None,
        };
        let updated = self.registry.set_status(spot_id, assignment, spot.version).await?;

        self.audit
            .record_override(SpotOverrideEntry {
                timestamp: now,
                actor: actor.to_string(),
                spot_id: spot_id.to_string(),
                old_status: spot.status,
                new_status: status,
                reason: reason.to_string(),
            })
            .await?;

        info!(
            spot_id,
            actor,
            old_status = %spot.status,
            new_status = %status,
            reason,
            "Spot status overridden"
        );
        self.events.publish(Event::SpotOverridden(SpotOverriddenEvent {
            spot_id: spot_id.to_string(),
            actor: actor.to_string(),
            old_status: spot.status.to_string(),
            new_status: status.to_string(),
            timestamp: now,
        }));
        if status == SpotStatus::Available && spot.status != SpotStatus::Available {
            metrics::counter!("parking_spot_freed_total", "reason" => FreeReason::Override.as_str())
                .increment(1);
            self.events.publish(Event::SpotFreed(SpotFreedEvent {
                spot_id: spot_id.to_string(),
                reservation_id: None,
                reason: FreeReason::Override,
                timestamp: now,
            }));
        }

        Ok(updated)
    }

    /// Replace the toggles and log the change. Returns the previous toggles.
    pub async fn update_toggles(
        &self,
        actor: &str,
        toggles: SystemToggles,
        reason: &str,
    ) -> DomainResult<SystemToggles> {
        if actor.trim().is_empty() {
            return Err(DomainError::Validation("actor must not be empty".into()));
        }
        let action = describe_toggles(&toggles);
        let previous = self.settings.replace(toggles);

        self.audit
            .record_system_action(SystemActionEntry {
                timestamp: self.clock.now(),
                actor: actor.to_string(),
                action: action.clone(),
                reason: reason.to_string(),
            })
            .await?;

        info!(actor, action = %action, reason, "System toggles updated");
        Ok(previous)
    }

    pub fn toggles(&self) -> SystemToggles {
        self.settings.toggles()
    }

    pub async fn overrides(&self) -> DomainResult<Vec<SpotOverrideEntry>> {
        self.audit.overrides().await
    }

    pub async fn system_actions(&self) -> DomainResult<Vec<SystemActionEntry>> {
        self.audit.system_actions().await
    }

    async fn detach_owner(&self, owner_id: &str, actor: &str, reason: &str) -> DomainResult<()> {
        let owner = match self.reservations.get(owner_id).await {
            Ok(owner) => owner,
            Err(DomainError::RecordNotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        if !owner.status.is_open() {
            return Ok(());
        }

        let note = format!("overridden by {actor}: {reason}");
        let now = self.clock.now();
        self.reservations
            .compare_and_update(
                &owner.id,
                owner.version,
                Box::new(move |r: &mut Reservation| r.cancel(note, now)),
            )
            .await?;
        warn!(reservation_id = %owner.id, spot_id = %owner.spot_id, actor, "Reservation cancelled by override");
        Ok(())
    }
}

fn describe_toggles(toggles: &SystemToggles) -> String {
    format!(
        "set_toggles system={} detection={} reservations={} disabled_zones=[{}]",
        toggles.system_enabled,
        toggles.detection_enabled,
        toggles.reservations_enabled,
        toggles.disabled_zones.join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::parking::test_support::Harness;
    use crate::domain::ReservationStatus;

    fn occupant() -> Option<Occupant> {
        Some(Occupant {
            plate: "VIP-1".into(),
            name: "Guest".into(),
        })
    }

    #[tokio::test]
    async fn override_writes_audit_entry() {
        let h = Harness::with_spots(&["S1"]).await;
        let admin = h.admin();

        let spot = admin
            .force_set_spot_status("ops", "S1", SpotStatus::Maintenance, None, "broken sensor")
            .await
            .unwrap();
        assert_eq!(spot.status, SpotStatus::Maintenance);

        let log = admin.overrides().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].actor, "ops");
        assert_eq!(log[0].old_status, SpotStatus::Available);
        assert_eq!(log[0].new_status, SpotStatus::Maintenance);
        assert_eq!(log[0].reason, "broken sensor");
    }

    #[tokio::test]
    async fn held_override_rejects_blank_plate_and_keeps_owner() {
        let h = Harness::with_spots(&["S1"]).await;
        let r = h.reserve("S1", "ABC-1").await.unwrap();
        let admin = h.admin();

        let blank = Some(Occupant {
            plate: "".into(),
            name: "Guest".into(),
        });
        let err = admin
            .force_set_spot_status("ops", "S1", SpotStatus::Occupied, blank, "valet")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let spot = h.registry.get("S1").await.unwrap();
        assert_eq!(spot.status, SpotStatus::Reserved);
        assert_eq!(spot.occupant_plate(), Some("ABC-1"));
        assert_eq!(
            h.lifecycle.get_reservation(&r.id).await.unwrap().status,
            ReservationStatus::WaitingDetection
        );
        assert!(admin.overrides().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn held_override_requires_occupant() {
        let h = Harness::with_spots(&["S1"]).await;
        let admin = h.admin();

        let err = admin
            .force_set_spot_status("ops", "S1", SpotStatus::Occupied, None, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let spot = admin
            .force_set_spot_status("ops", "S1", SpotStatus::Occupied, occupant(), "valet")
            .await
            .unwrap();
        assert_eq!(spot.occupant_plate(), Some("VIP-1"));
        assert_eq!(admin.overrides().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn override_cancels_owning_reservation_and_frees_spot() {
        let h = Harness::with_spots(&["S1"]).await;
        let admin = h.admin();
        let mut events = h.bus.subscribe();
        let r = h.reserve("S1", "ABC-1").await.unwrap();

        let spot = admin
            .force_set_spot_status("ops", "S1", SpotStatus::Available, None, "manual reset")
            .await
            .unwrap();

        assert!(spot.is_available());
        assert!(spot.reservation_id.is_none());
        let owner = h.lifecycle.get_reservation(&r.id).await.unwrap();
        assert_eq!(owner.status, ReservationStatus::Cancelled);
        assert_eq!(owner.cancel_reason.as_deref(), Some("overridden by ops: manual reset"));

        let freed = h.next_freed(&mut events).await;
        assert_eq!(freed.reason, FreeReason::Override);
        assert!(freed.reservation_id.is_none());

        // The spot can be booked again right away.
        assert!(h.reserve("S1", "NEXT-1").await.is_ok());
    }

    #[tokio::test]
    async fn toggles_update_is_logged_and_applied() {
        let h = Harness::with_spots(&["S1"]).await;
        let admin = h.admin();

        let previous = admin
            .update_toggles(
                "ops",
                SystemToggles {
                    reservations_enabled: false,
                    ..Default::default()
                },
                "maintenance window",
            )
            .await
            .unwrap();
        assert!(previous.reservations_enabled);

        let err = h.reserve("S1", "ABC-1").await.unwrap_err();
        assert!(matches!(err, DomainError::ServiceDisabled(_)));

        let actions = admin.system_actions().await.unwrap();
        assert_eq!(actions.len(), 1);
        assert!(actions[0].action.contains("reservations=false"));
        assert_eq!(actions[0].reason, "maintenance window");
    }

    #[tokio::test]
    async fn empty_actor_is_rejected() {
        let h = Harness::with_spots(&["S1"]).await;
        let err = h
            .admin()
            .force_set_spot_status(" ", "S1", SpotStatus::Maintenance, None, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
