//! Parking services: spot registry, reservation lifecycle, expiration
//! sweeper, waitlist dispatcher, detection intake and operator actions.

pub mod admin;
pub mod detection;
pub mod dispatcher;
pub mod lifecycle;
pub mod registry;
pub mod sweeper;

pub use admin::AdminService;
pub use detection::{
    detection_channel, DetectionEvent, DetectionListener, DetectionPoller, DetectionPublisher,
};
pub use dispatcher::{availability_message, WaitlistDispatcher};
pub use lifecycle::{LifecycleManager, NewReservation};
pub use registry::{OccupancySummary, SpotRegistry};
pub use sweeper::{ExpirationSweeper, SweepReport};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Mutex;

    use super::*;
    use crate::application::events::{create_event_bus, Event, EventSubscriber, SharedEventBus, SpotFreedEvent};
    use crate::application::ports::{NotificationChannel, NotificationError};
    use crate::config::LifecycleConfig;
    use crate::domain::{DomainResult, ManualClock, Reservation, SharedSettings, SpotStatus};
    use crate::infrastructure::storage::{
        InMemoryAuditLog, InMemoryReservationStore, InMemorySpotStore, InMemoryWaitlist,
    };
    use crate::shared::KeyedLocks;

    /// Services wired over in-memory stores and a manual clock.
    pub(crate) struct Harness {
        pub clock: ManualClock,
        pub settings: SharedSettings,
        pub bus: SharedEventBus,
        pub registry: Arc<SpotRegistry>,
        pub reservations: Arc<InMemoryReservationStore>,
        pub waitlist: Arc<InMemoryWaitlist>,
        pub audit: Arc<InMemoryAuditLog>,
        pub locks: KeyedLocks,
        pub lifecycle: Arc<LifecycleManager>,
    }

    impl Harness {
        /// Available spots; the zone is the first character of the id.
        pub async fn with_spots(ids: &[&str]) -> Self {
            Self::with_spots_on_bus(ids, create_event_bus()).await
        }

        pub async fn with_spots_on_bus(ids: &[&str], bus: SharedEventBus) -> Self {
            let clock = ManualClock::new(Utc::now());
            let settings = SharedSettings::default();
            let registry = Arc::new(SpotRegistry::new(
                Arc::new(InMemorySpotStore::new()),
                Arc::new(clock.clone()),
            ));
            for id in ids {
                let zone: String = id.chars().take(1).collect();
                registry.register(id, &zone, SpotStatus::Available).await.unwrap();
            }

            let reservations = Arc::new(InMemoryReservationStore::new());
            let locks = KeyedLocks::new();
            let lifecycle = Arc::new(LifecycleManager::new(
                registry.clone(),
                reservations.clone(),
                locks.clone(),
                Arc::new(settings.clone()),
                bus.clone(),
                Arc::new(clock.clone()),
                LifecycleConfig::default(),
            ));

            Self {
                clock,
                settings,
                bus,
                registry,
                reservations,
                waitlist: Arc::new(InMemoryWaitlist::new()),
                audit: Arc::new(InMemoryAuditLog::new()),
                locks,
                lifecycle,
            }
        }

        pub async fn reserve(&self, spot_id: &str, plate: &str) -> DomainResult<Reservation> {
            self.lifecycle
                .create_reservation(NewReservation {
                    spot_id: spot_id.into(),
                    plate: plate.into(),
                    customer_name: "Test Driver".into(),
                    contact: "driver@example.com".into(),
                    duration_minutes: 30,
                })
                .await
        }

        pub fn dispatcher(&self, channel: Arc<dyn NotificationChannel>) -> WaitlistDispatcher {
            WaitlistDispatcher::new(
                self.lifecycle.clone(),
                self.waitlist.clone(),
                channel,
                self.bus.clone(),
            )
        }

        pub fn admin(&self) -> AdminService {
            AdminService::new(
                self.registry.clone(),
                self.reservations.clone(),
                self.audit.clone(),
                self.settings.clone(),
                self.locks.clone(),
                self.bus.clone(),
                Arc::new(self.clock.clone()),
                Duration::from_secs(2),
            )
        }

        /// Next `SpotFreed` event, skipping others. Panics after one second.
        pub async fn next_freed(&self, events: &mut EventSubscriber) -> SpotFreedEvent {
            self.try_next_freed_within(events, Duration::from_secs(1))
                .await
                .expect("no SpotFreed event")
        }

        pub async fn try_next_freed(&self, events: &mut EventSubscriber) -> Option<SpotFreedEvent> {
            self.try_next_freed_within(events, Duration::from_millis(50)).await
        }

        async fn try_next_freed_within(
            &self,
            events: &mut EventSubscriber,
            wait: Duration,
        ) -> Option<SpotFreedEvent> {
            tokio::time::timeout(wait, async {
                while let Some(message) = events.recv().await {
                    if let Event::SpotFreed(freed) = message.event {
                        return Some(freed);
                    }
                }
                None
            })
            .await
            .ok()
            .flatten()
        }
    }

    /// Keeps every message it is asked to send.
    #[derive(Default)]
    pub(crate) struct RecordingChannel {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingChannel {
        pub async fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn send(&self, contact: &str, message: &str) -> Result<(), NotificationError> {
            self.sent
                .lock()
                .await
                .push((contact.to_string(), message.to_string()));
            Ok(())
        }
    }

    pub(crate) struct FailingChannel;

    #[async_trait]
    impl NotificationChannel for FailingChannel {
        async fn send(&self, contact: &str, _message: &str) -> Result<(), NotificationError> {
            Err(NotificationError::InvalidRecipient(contact.to_string()))
        }
    }
}
