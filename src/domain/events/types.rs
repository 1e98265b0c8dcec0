//! Lifecycle events
//!
//! Defines all event types that can be broadcasted to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a spot returned to `available`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeReason {
    Cancelled,
    Expired,
    Completed,
    Override,
}

impl FreeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Completed => "completed",
            Self::Override => "override",
        }
    }
}

/// Event types for subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    ReservationCreated(ReservationCreatedEvent),
    ReservationActivated(ReservationActivatedEvent),
    SpotFreed(SpotFreedEvent),
    ReservationOverstayed(ReservationOverstayedEvent),
    SpotOverridden(SpotOverriddenEvent),
    WaitlistAssigned(WaitlistAssignedEvent),
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::ReservationCreated(_) => "reservation_created",
            Event::ReservationActivated(_) => "reservation_activated",
            Event::SpotFreed(_) => "spot_freed",
            Event::ReservationOverstayed(_) => "reservation_overstayed",
            Event::SpotOverridden(_) => "spot_overridden",
            Event::WaitlistAssigned(_) => "waitlist_assigned",
        }
    }

    pub fn spot_id(&self) -> &str {
        match self {
            Event::ReservationCreated(e) => &e.spot_id,
            Event::ReservationActivated(e) => &e.spot_id,
            Event::SpotFreed(e) => &e.spot_id,
            Event::ReservationOverstayed(e) => &e.spot_id,
            Event::SpotOverridden(e) => &e.spot_id,
            Event::WaitlistAssigned(e) => &e.spot_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationCreatedEvent {
    pub reservation_id: String,
    pub spot_id: String,
    pub plate: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationActivatedEvent {
    pub reservation_id: String,
    pub spot_id: String,
    pub plate: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotFreedEvent {
    pub spot_id: String,
    /// Reservation released, absent for operator overrides
    pub reservation_id: Option<String>,
    pub reason: FreeReason,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationOverstayedEvent {
    pub reservation_id: String,
    pub spot_id: String,
    pub plate: String,
    pub end_time: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotOverriddenEvent {
    pub spot_id: String,
    pub actor: String,
    pub old_status: String,
    pub new_status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitlistAssignedEvent {
    pub spot_id: String,
    pub reservation_id: String,
    pub plate: String,
    pub timestamp: DateTime<Utc>,
}

/// Envelope carrying an event and its publication time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub published_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventMessage {
    pub fn new(event: Event) -> Self {
        Self {
            published_at: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spot_freed_serializes_with_tag() {
        let event = Event::SpotFreed(SpotFreedEvent {
            spot_id: "S3".into(),
            reservation_id: Some("R1".into()),
            reason: FreeReason::Expired,
            timestamp: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SpotFreed");
        assert_eq!(json["data"]["reason"], "expired");
        assert_eq!(event.spot_id(), "S3");
        assert_eq!(event.event_type(), "spot_freed");
    }
}
