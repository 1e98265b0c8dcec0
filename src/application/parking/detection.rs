//! Plate detection intake
//!
//! Detections arrive either pushed through a channel ([`DetectionPublisher`]
//! feeding a [`DetectionListener`]) or by polling a [`DetectionFeed`] on an
//! interval ([`DetectionPoller`]). Both end in
//! [`LifecycleManager::activate_on_detection`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::lifecycle::LifecycleManager;
use crate::application::ports::DetectionFeed;
use crate::domain::reservation::{ReservationFilter, ReservationStatus};
use crate::domain::{DomainError, DomainResult};
use crate::shared::ShutdownSignal;

/// A plate seen by a camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub plate: String,
    pub timestamp: DateTime<Utc>,
}

/// Sending half of the push channel
#[derive(Clone)]
pub struct DetectionPublisher {
    sender: mpsc::Sender<DetectionEvent>,
}

impl DetectionPublisher {
    pub async fn publish(&self, event: DetectionEvent) -> DomainResult<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| DomainError::ServiceDisabled("detection listener stopped".into()))
    }
}

/// Create the push channel. Hand the receiver to [`DetectionListener::start`].
pub fn detection_channel(capacity: usize) -> (DetectionPublisher, mpsc::Receiver<DetectionEvent>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (DetectionPublisher { sender }, receiver)
}

pub struct DetectionListener {
    lifecycle: Arc<LifecycleManager>,
}

impl DetectionListener {
    pub fn new(lifecycle: Arc<LifecycleManager>) -> Self {
        Self { lifecycle }
    }

    /// Apply one detection. Nothing waiting for the plate is not an error.
    pub async fn handle(&self, event: &DetectionEvent) -> DomainResult<bool> {
        let activated = self
            .lifecycle
            .activate_on_detection(&event.plate, event.timestamp)
            .await?;
        Ok(activated.is_some())
    }

    /// Consume pushed detections until shutdown or until every publisher is dropped.
    ///
    /// Whatever is queued when a batch is drained is applied in timestamp order.
    pub fn start(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<DetectionEvent>,
        shutdown: ShutdownSignal,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("📷 Detection listener started");

            loop {
                tokio::select! {
                    first = receiver.recv() => {
                        let Some(first) = first else {
                            debug!("All detection publishers dropped");
                            break;
                        };
                        let mut batch = vec![first];
                        while let Ok(next) = receiver.try_recv() {
                            batch.push(next);
                        }
                        batch.sort_by_key(|e| e.timestamp);

                        for event in &batch {
                            if let Err(e) = self.handle(event).await {
                                warn!(plate = %event.plate, error = %e, "Failed to apply detection");
                            }
                        }
                    }
                    _ = shutdown.notified().wait() => {
                        info!("📷 Detection listener shutting down");
                        break;
                    }
                }
            }

            info!("📷 Detection listener stopped");
        })
    }
}

/// Polling fallback over a rolling-window detection feed
pub struct DetectionPoller {
    lifecycle: Arc<LifecycleManager>,
    feed: Arc<dyn DetectionFeed>,
    window_minutes: u32,
    interval: Duration,
}

impl DetectionPoller {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        feed: Arc<dyn DetectionFeed>,
        window_minutes: u32,
        interval: Duration,
    ) -> Self {
        Self {
            lifecycle,
            feed,
            window_minutes,
            interval,
        }
    }

    /// Check every waiting plate against the feed. Returns how many were activated.
    pub async fn poll_once(&self) -> DomainResult<usize> {
        let waiting = self
            .lifecycle
            .list_reservations(&ReservationFilter::with_status(ReservationStatus::WaitingDetection))
            .await?;

        let mut activated = 0;
        for reservation in waiting {
            let Some(seen_at) = self
                .feed
                .last_detection(&reservation.plate, self.window_minutes)
                .await
            else {
                continue;
            };
            match self.lifecycle.activate_on_detection(&reservation.plate, seen_at).await {
                Ok(Some(_)) => activated += 1,
                Ok(None) => {}
                Err(e) => warn!(plate = %reservation.plate, error = %e, "Failed to apply polled detection"),
            }
        }
        Ok(activated)
    }

    pub fn start(self: Arc<Self>, shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                window_minutes = self.window_minutes,
                "📷 Detection poller started"
            );

            let mut interval = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match self.poll_once().await {
                            Ok(0) => {}
                            Ok(n) => debug!(activated = n, "Detection poll finished"),
                            Err(e) => warn!(error = %e, "Detection poll failed"),
                        }
                    }
                    _ = shutdown.notified().wait() => {
                        info!("📷 Detection poller shutting down");
                        break;
                    }
                }
            }

            info!("📷 Detection poller stopped");
        })
    }
}
