//! In-memory rolling-window detection feed

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::application::ports::DetectionFeed;
use crate::domain::{normalize_plate, SharedClock};

/// Latest sighting per plate, answered relative to the clock.
pub struct InMemoryDetectionFeed {
    last_seen: DashMap<String, DateTime<Utc>>,
    clock: SharedClock,
}

impl InMemoryDetectionFeed {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            last_seen: DashMap::new(),
            clock,
        }
    }

    /// Record a sighting. An older timestamp never replaces a newer one.
    pub async fn record(&self, plate: &str, seen_at: DateTime<Utc>) {
        self.last_seen
            .entry(normalize_plate(plate))
            .and_modify(|t| *t = (*t).max(seen_at))
            .or_insert(seen_at);
    }
}

#[async_trait]
impl DetectionFeed for InMemoryDetectionFeed {
    async fn was_detected_recently(&self, plate: &str, window_minutes: u32) -> bool {
        self.last_detection(plate, window_minutes).await.is_some()
    }

    async fn last_detection(&self, plate: &str, window_minutes: u32) -> Option<DateTime<Utc>> {
        let seen_at = *self.last_seen.get(&normalize_plate(plate))?;
        let cutoff = self.clock.now() - Duration::minutes(i64::from(window_minutes));
        (seen_at >= cutoff).then_some(seen_at)
    }
}
