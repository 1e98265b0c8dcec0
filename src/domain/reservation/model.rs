//! Reservation domain entity

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{DomainError, DomainResult};

/// Reservation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Spot held, vehicle not yet seen
    WaitingDetection,
    /// Vehicle detected, fixed window running
    Active,
    /// Vehicle left or operator closed the reservation
    Completed,
    /// Cancelled by user or operator
    Cancelled,
    /// No detection within the waiting timeout
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingDetection => "waiting_detection",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "waiting_detection" => Some(Self::WaitingDetection),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    /// Statuses that own their spot
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Plates are matched case-insensitively and without surrounding whitespace.
pub fn normalize_plate(plate: &str) -> String {
    plate.trim().to_uppercase()
}

/// Time-bounded claim of a spot by a vehicle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Unique reservation ID, derived from plate and creation time
    pub id: String,
    pub spot_id: String,
    pub plate: String,
    pub customer_name: String,
    pub contact: String,
    pub duration_minutes: u32,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    /// Set on detection
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    /// When the reservation reached a terminal state
    pub closed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency stamp, bumped by the store on every write
    pub version: u64,
}

impl Reservation {
    pub fn new(
        spot_id: impl Into<String>,
        plate: &str,
        customer_name: impl Into<String>,
        contact: impl Into<String>,
        duration_minutes: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        let plate = normalize_plate(plate);
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}-{}-{}", plate, created_at.timestamp_millis(), &suffix[..8]),
            spot_id: spot_id.into(),
            plate,
            customer_name: customer_name.into(),
            contact: contact.into(),
            duration_minutes,
            status: ReservationStatus::WaitingDetection,
            created_at,
            start_time: None,
            end_time: None,
            cancel_reason: None,
            closed_at: None,
            version: 0,
        }
    }

    fn invalid(&self, action: &'static str) -> DomainError {
        DomainError::InvalidTransition {
            reservation_id: self.id.clone(),
            from: self.status.as_str().to_string(),
            action,
        }
    }

    /// Vehicle arrived: start the fixed active window at the detection time.
    pub fn activate(&mut self, detected_at: DateTime<Utc>, window: Duration) -> DomainResult<()> {
        if self.status != ReservationStatus::WaitingDetection {
            return Err(self.invalid("activate"));
        }
        self.status = ReservationStatus::Active;
        self.start_time = Some(detected_at);
        self.end_time = Some(detected_at + window);
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.is_open() {
            return Err(self.invalid("cancel"));
        }
        self.status = ReservationStatus::Cancelled;
        self.cancel_reason = Some(reason.into());
        self.closed_at = Some(now);
        Ok(())
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != ReservationStatus::WaitingDetection {
            return Err(self.invalid("expire"));
        }
        self.status = ReservationStatus::Expired;
        self.closed_at = Some(now);
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != ReservationStatus::Active {
            return Err(self.invalid("complete"));
        }
        self.status = ReservationStatus::Completed;
        self.closed_at = Some(now);
        Ok(())
    }

    /// Waiting longer than `timeout` since creation (strictly greater).
    pub fn is_overdue(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.status == ReservationStatus::WaitingDetection && now - self.created_at > timeout
    }

    /// Active past its end time
    pub fn is_overstayed(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && self.end_time.is_some_and(|end| now > end)
    }
}

/// Filter for listing reservations
#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub status: Option<ReservationStatus>,
    pub plate: Option<String>,
    pub spot_id: Option<String>,
}

impl ReservationFilter {
    pub fn with_status(status: ReservationStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn for_spot(spot_id: impl Into<String>) -> Self {
        Self {
            spot_id: Some(spot_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, r: &Reservation) -> bool {
        self.status.map_or(true, |s| r.status == s)
            && self
                .plate
                .as_deref()
                .map_or(true, |p| r.plate == normalize_plate(p))
            && self.spot_id.as_deref().map_or(true, |s| r.spot_id == s)
    }
}

// ── Tests ──────────────────────────────────────────────────────
