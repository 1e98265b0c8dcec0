//! Expiration sweeper
//!
//! Background task that periodically expires reservations nobody showed
//! up for and handles active reservations past their end time.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::lifecycle::LifecycleManager;
use crate::application::events::{Event, ReservationOverstayedEvent, SharedEventBus};
use crate::config::{OverstayPolicy, SweeperConfig};
use crate::domain::reservation::{ReservationFilter, ReservationStatus};
use crate::domain::DomainResult;
use crate::shared::ShutdownSignal;

/// Outcome of one sweep cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    /// Overstays flagged for the first time
    pub overstayed: usize,
    /// Overstays closed under `auto_complete`
    pub completed: usize,
    /// Spots freed from reservations already closed elsewhere
    pub reclaimed: usize,
    /// Per-record failures, logged and skipped
    pub failures: usize,
}

pub struct ExpirationSweeper {
    lifecycle: Arc<LifecycleManager>,
    events: SharedEventBus,
    config: SweeperConfig,
    /// Active reservations already reported as overstayed
    flagged: Mutex<HashSet<String>>,
    running: Arc<AtomicBool>,
}

impl ExpirationSweeper {
    pub fn new(lifecycle: Arc<LifecycleManager>, events: SharedEventBus) -> Self {
        Self {
            lifecycle,
            events,
            config: SweeperConfig::default(),
            flagged: Mutex::new(HashSet::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_config(mut self, config: SweeperConfig) -> Self {
        self.config = config;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the periodic sweep. The task stops when `shutdown` fires.
    pub fn start(self: Arc<Self>, shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.running.store(true, Ordering::SeqCst);
            info!(
                interval_secs = self.config.interval_secs,
                policy = ?self.config.overstay_policy,
                "🧹 Expiration sweeper started"
            );

            let mut interval =
                tokio::time::interval(Duration::from_secs(self.config.interval_secs));

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.jitter().await;
                        let now = self.lifecycle.clock().now();
                        match self.run_once(now).await {
                            Ok(report) if report != SweepReport::default() => {
                                info!(
                                    expired = report.expired,
                                    overstayed = report.overstayed,
                                    completed = report.completed,
                                    reclaimed = report.reclaimed,
                                    failures = report.failures,
                                    "Sweep finished"
                                );
                            }
                            Ok(_) => debug!("Sweep finished, nothing to do"),
                            Err(e) => warn!(error = %e, "Sweep cycle failed"),
                        }
                    }
                    _ = shutdown.notified().wait() => {
                        info!("🧹 Expiration sweeper shutting down");
                        break;
                    }
                }
            }

            self.running.store(false, Ordering::SeqCst);
            info!("🧹 Expiration sweeper stopped");
        })
    }

    /// One sweep over all open reservations as of `now`.
    ///
    /// A failing record is logged and skipped, the rest of the cycle goes on.
    pub async fn run_once(&self, now: DateTime<Utc>) -> DomainResult<SweepReport> {
        metrics::counter!("parking_sweeps_total").increment(1);
        let mut report = SweepReport::default();

        self.expire_waiting(now, &mut report).await?;
        self.handle_overstays(now, &mut report).await?;

        match self.lifecycle.reclaim_orphaned_spots().await {
            Ok(n) => report.reclaimed = n,
            Err(e) => {
                warn!(error = %e, "Failed to reclaim orphaned spots");
                report.failures += 1;
            }
        }

        Ok(report)
    }

    async fn expire_waiting(&self, now: DateTime<Utc>, report: &mut SweepReport) -> DomainResult<()> {
        let timeout = self.lifecycle.config().waiting_timeout();
        let waiting = self
            .lifecycle
            .list_reservations(&ReservationFilter::with_status(ReservationStatus::WaitingDetection))
            .await?;

        for reservation in waiting.iter().filter(|r| r.is_overdue(now, timeout)) {
            match self.lifecycle.expire_if_overdue(&reservation.id, now).await {
                Ok(Some(_)) => report.expired += 1,
                Ok(None) => {}
                Err(e) if e.is_expected_race() => {
                    debug!(reservation_id = %reservation.id, error = %e, "Skipped, state changed");
                }
                Err(e) => {
                    warn!(reservation_id = %reservation.id, error = %e, "Failed to expire reservation");
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }

    async fn handle_overstays(&self, now: DateTime<Utc>, report: &mut SweepReport) -> DomainResult<()> {
        let active = self
            .lifecycle
            .list_reservations(&ReservationFilter::with_status(ReservationStatus::Active))
            .await?;

        let mut flagged = self.flagged.lock().await;
        // Forget reservations that are no longer active.
        flagged.retain(|id| active.iter().any(|r| &r.id == id));

        for reservation in active.iter().filter(|r| r.is_overstayed(now)) {
            match self.config.overstay_policy {
                OverstayPolicy::Advisory => {
                    if !flagged.insert(reservation.id.clone()) {
                        continue;
                    }
                    let end_time = reservation.end_time.unwrap_or(now);
                    info!(
                        reservation_id = %reservation.id,
                        spot_id = %reservation.spot_id,
                        plate = %reservation.plate,
                        end_time = %end_time,
                        "Reservation overstayed"
                    );
                    self.events.publish(Event::ReservationOverstayed(ReservationOverstayedEvent {
                        reservation_id: reservation.id.clone(),
                        spot_id: reservation.spot_id.clone(),
                        plate: reservation.plate.clone(),
                        end_time,
                        timestamp: now,
                    }));
                    report.overstayed += 1;
                }
                OverstayPolicy::AutoComplete => {
                    match self.lifecycle.complete_reservation(&reservation.id).await {
                        Ok(_) => report.completed += 1,
                        Err(e) if e.is_expected_race() => {
                            debug!(reservation_id = %reservation.id, error = %e, "Skipped, state changed");
                        }
                        Err(e) => {
                            warn!(reservation_id = %reservation.id, error = %e, "Failed to complete overstay");
                            report.failures += 1;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn jitter(&self) {
        if self.config.jitter_ms == 0 {
            return;
        }
        let delay = rand::thread_rng().gen_range(0..=self.config.jitter_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::parking::test_support::Harness;
    use crate::domain::events::FreeReason;
    use crate::domain::{Clock, SpotStatus};
    use chrono::Duration as ChronoDuration;

    fn sweeper(h: &Harness, policy: OverstayPolicy) -> ExpirationSweeper {
        ExpirationSweeper::new(h.lifecycle.clone(), h.bus.clone()).with_config(SweeperConfig {
            interval_secs: 1,
            jitter_ms: 0,
            overstay_policy: policy,
        })
    }

    #[tokio::test]
    async fn sweep_expires_only_overdue_waiting_reservations() {
        let h = Harness::with_spots(&["S1", "S2"]).await;
        let old = h.reserve("S1", "OLD-1").await.unwrap();
        h.clock.advance(ChronoDuration::minutes(20));
        let fresh = h.reserve("S2", "NEW-1").await.unwrap();
        let sweeper = sweeper(&h, OverstayPolicy::Advisory);

        let report = sweeper
            .run_once(old.created_at + ChronoDuration::minutes(31))
            .await
            .unwrap();

        assert_eq!(report.expired, 1);
        assert_eq!(
            h.lifecycle.get_reservation(&old.id).await.unwrap().status,
            ReservationStatus::Expired
        );
        assert_eq!(
            h.lifecycle.get_reservation(&fresh.id).await.unwrap().status,
            ReservationStatus::WaitingDetection
        );
        assert!(h.registry.get("S1").await.unwrap().is_available());
        assert_eq!(h.registry.get("S2").await.unwrap().status, SpotStatus::Reserved);
    }

    #[tokio::test]
    async fn repeated_sweeps_do_not_duplicate_events() {
        let h = Harness::with_spots(&["S1"]).await;
        let mut events = h.bus.subscribe();
        let r = h.reserve("S1", "ABC-1").await.unwrap();
        let sweeper = sweeper(&h, OverstayPolicy::Advisory);
        let later = r.created_at + ChronoDuration::minutes(45);

        assert_eq!(sweeper.run_once(later).await.unwrap().expired, 1);
        assert_eq!(sweeper.run_once(later).await.unwrap(), SweepReport::default());

        assert_eq!(h.next_freed(&mut events).await.reason, FreeReason::Expired);
        assert!(h.try_next_freed(&mut events).await.is_none());
    }

    #[tokio::test]
    async fn advisory_overstay_is_reported_once() {
        let h = Harness::with_spots(&["S1"]).await;
        h.reserve("S1", "ABC-1").await.unwrap();
        let seen = h.clock.now();
        h.lifecycle.activate_on_detection("ABC-1", seen).await.unwrap();
        let sweeper = sweeper(&h, OverstayPolicy::Advisory);
        let late = seen + ChronoDuration::minutes(20);

        assert_eq!(sweeper.run_once(late).await.unwrap().overstayed, 1);
        assert_eq!(sweeper.run_once(late).await.unwrap().overstayed, 0);
        assert_eq!(h.registry.get("S1").await.unwrap().status, SpotStatus::Occupied);
    }

    #[tokio::test]
    async fn auto_complete_frees_overstayed_spot() {
        let h = Harness::with_spots(&["S1"]).await;
        let r = h.reserve("S1", "ABC-1").await.unwrap();
        let seen = h.clock.now();
        h.lifecycle.activate_on_detection("ABC-1", seen).await.unwrap();
        let sweeper = sweeper(&h, OverstayPolicy::AutoComplete);

        let report = sweeper.run_once(seen + ChronoDuration::minutes(20)).await.unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(
            h.lifecycle.get_reservation(&r.id).await.unwrap().status,
            ReservationStatus::Completed
        );
        assert!(h.registry.get("S1").await.unwrap().is_available());
    }

    #[tokio::test]
    async fn active_within_window_is_untouched() {
        let h = Harness::with_spots(&["S1"]).await;
        h.reserve("S1", "ABC-1").await.unwrap();
        let seen = h.clock.now();
        h.lifecycle.activate_on_detection("ABC-1", seen).await.unwrap();
        let sweeper = sweeper(&h, OverstayPolicy::AutoComplete);

        let report = sweeper.run_once(seen + ChronoDuration::minutes(10)).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn background_task_stops_on_shutdown() {
        let h = Harness::with_spots(&["S1"]).await;
        let sweeper = Arc::new(sweeper(&h, OverstayPolicy::Advisory));
        let shutdown = ShutdownSignal::new();

        let handle = sweeper.clone().start(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sweeper.is_running());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!sweeper.is_running());
    }
}
