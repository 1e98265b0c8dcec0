//! Waitlist dispatcher
//!
//! Listens for `SpotFreed` events and hands the freed spot to the oldest
//! waitlist entry by creating a reservation on its behalf. Freed events
//! lost to a lagging subscription are caught up by [`WaitlistDispatcher::reconcile`],
//! which also runs on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::lifecycle::{LifecycleManager, NewReservation};
use crate::application::events::{Delivery, Event, SharedEventBus, WaitlistAssignedEvent};
use crate::application::ports::NotificationChannel;
use crate::domain::reservation::{normalize_plate, Reservation};
use crate::domain::spot::{SpotFilter, SpotStatus};
use crate::domain::waitlist::{WaitlistEntry, WaitlistQueue};
use crate::domain::{DomainError, DomainResult};
use crate::shared::ShutdownSignal;

const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

pub struct WaitlistDispatcher {
    lifecycle: Arc<LifecycleManager>,
    waitlist: Arc<dyn WaitlistQueue>,
    notifier: Arc<dyn NotificationChannel>,
    events: SharedEventBus,
    reconcile_interval: Duration,
}

impl WaitlistDispatcher {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        waitlist: Arc<dyn WaitlistQueue>,
        notifier: Arc<dyn NotificationChannel>,
        events: SharedEventBus,
    ) -> Self {
        Self {
            lifecycle,
            waitlist,
            notifier,
            events,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval.max(Duration::from_millis(10));
        self
    }

    /// Queue a requester for the next freed spot.
    pub async fn enqueue(&self, plate: &str, name: &str, contact: &str) -> DomainResult<WaitlistEntry> {
        if normalize_plate(plate).is_empty() {
            return Err(DomainError::Validation("plate must not be empty".into()));
        }
        let entry = self
            .waitlist
            .push(WaitlistEntry::new(plate, name, contact, self.lifecycle.clock().now()))
            .await?;
        info!(plate = %entry.plate, "Added to waitlist");
        Ok(entry)
    }

    pub async fn pending(&self) -> DomainResult<Vec<WaitlistEntry>> {
        self.waitlist.list().await
    }

    /// Give `spot_id` to the oldest waiting entry.
    ///
    /// Returns `Ok(None)` when the waitlist is empty or the spot was taken
    /// first. In the latter case the entry goes back to its original place.
    pub async fn handle_spot_freed(&self, spot_id: &str) -> DomainResult<Option<Reservation>> {
        let Some(entry) = self.waitlist.pop_oldest().await? else {
            debug!(spot_id, "Spot freed, waitlist empty");
            return Ok(None);
        };

        let request = NewReservation {
            spot_id: spot_id.to_string(),
            plate: entry.plate.clone(),
            customer_name: entry.name.clone(),
            contact: entry.contact.clone(),
            duration_minutes: self.lifecycle.config().waitlist_duration_minutes,
        };

        let reservation = match self.lifecycle.create_reservation(request).await {
            Ok(reservation) => reservation,
            Err(e) => {
                self.requeue(entry).await;
                return match e {
                    DomainError::SpotUnavailable { .. } | DomainError::ServiceDisabled(_) => {
                        debug!(spot_id, error = %e, "Freed spot not assignable");
                        Ok(None)
                    }
                    other => Err(other),
                };
            }
        };

        info!(
            spot_id,
            reservation_id = %reservation.id,
            plate = %reservation.plate,
            "Waitlist entry assigned"
        );
        self.events.publish(Event::WaitlistAssigned(WaitlistAssignedEvent {
            spot_id: spot_id.to_string(),
            reservation_id: reservation.id.clone(),
            plate: reservation.plate.clone(),
            timestamp: reservation.created_at,
        }));

        self.notify(&entry, &reservation).await;
        Ok(Some(reservation))
    }

    /// Offer every available spot to the waitlist until one of them runs out.
    /// Returns how many entries were assigned.
    pub async fn reconcile(&self) -> DomainResult<usize> {
        if self.waitlist.len().await? == 0 {
            return Ok(0);
        }
        let available = self
            .lifecycle
            .registry()
            .list(&SpotFilter::with_status(SpotStatus::Available))
            .await?;

        let mut assigned = 0;
        for spot in available {
            if self.waitlist.len().await? == 0 {
                break;
            }
            match self.handle_spot_freed(&spot.id).await {
                Ok(Some(_)) => assigned += 1,
                Ok(None) => {}
                Err(e) => warn!(spot_id = %spot.id, error = %e, "Waitlist reconcile failed for spot"),
            }
        }

        if assigned > 0 {
            info!(assigned, "Waitlist reconciled with available spots");
        }
        Ok(assigned)
    }

    /// Consume `SpotFreed` events until shutdown, reconciling after lag
    /// and on every `reconcile_interval`.
    pub fn start(self: Arc<Self>, shutdown: ShutdownSignal) -> JoinHandle<()> {
        // Subscribe before spawning so no event published after `start` is missed.
        let mut subscriber = self.events.subscribe();

        tokio::spawn(async move {
            info!(
                reconcile_secs = self.reconcile_interval.as_secs(),
                "📋 Waitlist dispatcher started"
            );

            let mut reconcile = tokio::time::interval_at(
                Instant::now() + self.reconcile_interval,
                self.reconcile_interval,
            );
            reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    delivery = subscriber.next_delivery() => {
                        match delivery {
                            Some(Delivery::Event(message)) => {
                                if let Event::SpotFreed(freed) = message.event {
                                    if let Err(e) = self.handle_spot_freed(&freed.spot_id).await {
                                        warn!(spot_id = %freed.spot_id, error = %e, "Waitlist dispatch failed");
                                    }
                                }
                            }
                            Some(Delivery::Lagged(missed)) => {
                                warn!(missed, "Freed-spot events dropped, reconciling waitlist");
                                self.run_reconcile().await;
                            }
                            None => break,
                        }
                    }
                    _ = reconcile.tick() => self.run_reconcile().await,
                    _ = shutdown.notified().wait() => {
                        info!("📋 Waitlist dispatcher shutting down");
                        break;
                    }
                }
            }

            info!("📋 Waitlist dispatcher stopped");
        })
    }

    async fn run_reconcile(&self) {
        if let Err(e) = self.reconcile().await {
            warn!(error = %e, "Waitlist reconcile failed");
        }
    }

    async fn requeue(&self, entry: WaitlistEntry) {
        let plate = entry.plate.clone();
        if let Err(e) = self.waitlist.restore(entry).await {
            error!(plate = %plate, error = %e, "Failed to return entry to waitlist");
        }
    }

    async fn notify(&self, entry: &WaitlistEntry, reservation: &Reservation) {
        let message = availability_message(
            &entry.name,
            &reservation.plate,
            &reservation.spot_id,
            self.lifecycle.config().waiting_timeout_minutes,
        );

        match self.notifier.send(&entry.contact, &message).await {
            Ok(()) => {
                metrics::counter!("parking_notifications_total", "result" => "sent").increment(1);
                debug!(reservation_id = %reservation.id, "Waitlist notification sent");
            }
            Err(e) => {
                // Best effort: the reservation stands either way.
                metrics::counter!("parking_notifications_total", "result" => "failed").increment(1);
                let failure = DomainError::NotificationFailure(e.to_string());
                warn!(reservation_id = %reservation.id, error = %failure, "Waitlist notification failed");
            }
        }
    }
}

/// Text sent to a waitlisted requester once a spot is held for them.
pub fn availability_message(name: &str, plate: &str, spot_id: &str, timeout_minutes: u32) -> String {
    format!(
        "Hello {name}, A SmartPark spot is now available and reserved for your plate: {plate}. \
         Spot: {spot_id}. Please arrive within {timeout_minutes} minutes."
    )
}
