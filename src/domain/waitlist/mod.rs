//! Waitlist of requesters waiting for any spot to free up.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::reservation::normalize_plate;
use crate::domain::DomainResult;

/// One queued requester, consumed exactly once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub plate: String,
    pub name: String,
    pub contact: String,
    pub requested_at: DateTime<Utc>,
    /// Arrival order among entries with the same `requested_at`, stamped by the queue
    #[serde(default)]
    pub sequence: u64,
}

impl WaitlistEntry {
    pub fn new(
        plate: &str,
        name: impl Into<String>,
        contact: impl Into<String>,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            plate: normalize_plate(plate),
            name: name.into(),
            contact: contact.into(),
            requested_at,
            sequence: 0,
        }
    }
}

/// FIFO queue ordered by `requested_at`, ties broken by arrival order.
#[async_trait]
pub trait WaitlistQueue: Send + Sync {
    /// Append an entry. Returns it with its arrival sequence stamped.
    async fn push(&self, entry: WaitlistEntry) -> DomainResult<WaitlistEntry>;

    /// Put back an entry taken by `pop_oldest`, at the position it was taken from.
    async fn restore(&self, entry: WaitlistEntry) -> DomainResult<()>;

    /// Remove and return the oldest entry. Two concurrent callers never
    /// receive the same entry.
    async fn pop_oldest(&self) -> DomainResult<Option<WaitlistEntry>>;

    /// Snapshot in dispatch order
    async fn list(&self) -> DomainResult<Vec<WaitlistEntry>>;

    async fn len(&self) -> DomainResult<usize>;
}
