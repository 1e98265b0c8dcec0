//! Parking spot domain entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Spot status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotStatus {
    /// Free for a new reservation
    Available,
    /// Held for a reservation awaiting the vehicle
    Reserved,
    /// Vehicle detected on site
    Occupied,
    /// Taken out of service by an operator
    Maintenance,
}

impl SpotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Occupied => "occupied",
            Self::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Some(Self::Available),
            "reserved" => Some(Self::Reserved),
            "occupied" => Some(Self::Occupied),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }

    /// Statuses that require an occupant plate.
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Reserved | Self::Occupied)
    }
}

impl std::fmt::Display for SpotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Vehicle holding a spot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    pub plate: String,
    pub name: String,
}

/// Fields written together with a status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotAssignment {
    pub status: SpotStatus,
    pub occupant: Option<Occupant>,
    /// Reservation that owns the spot while it is held
    pub reservation_id: Option<String>,
    pub reserved_until: Option<DateTime<Utc>>,
}

impl SpotAssignment {
    /// Free spot with all occupant fields cleared
    pub fn vacant() -> Self {
        Self {
            status: SpotStatus::Available,
            occupant: None,
            reservation_id: None,
            reserved_until: None,
        }
    }

    pub fn held(
        status: SpotStatus,
        occupant: Occupant,
        reservation_id: impl Into<String>,
        reserved_until: DateTime<Utc>,
    ) -> Self {
        Self {
            status,
            occupant: Some(occupant),
            reservation_id: Some(reservation_id.into()),
            reserved_until: Some(reserved_until),
        }
    }
}

/// Numbered parking location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spot {
    pub id: String,
    pub zone: String,
    pub status: SpotStatus,
    pub occupant: Option<Occupant>,
    pub reservation_id: Option<String>,
    pub reserved_until: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    /// Optimistic concurrency stamp, bumped by the store on every write
    pub version: u64,
}

impl Spot {
    pub fn new(id: impl Into<String>, zone: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            zone: zone.into(),
            status: SpotStatus::Available,
            occupant: None,
            reservation_id: None,
            reserved_until: None,
            last_updated: now,
            version: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == SpotStatus::Available
    }

    pub fn occupant_plate(&self) -> Option<&str> {
        self.occupant.as_ref().map(|o| o.plate.as_str())
    }

    /// Apply an assignment. Occupant fields are always cleared on `available`.
    pub fn apply(&mut self, assignment: SpotAssignment, now: DateTime<Utc>) {
        self.status = assignment.status;
        if assignment.status == SpotStatus::Available {
            self.occupant = None;
            self.reservation_id = None;
            self.reserved_until = None;
        } else {
            self.occupant = assignment.occupant;
            self.reservation_id = assignment.reservation_id;
            self.reserved_until = assignment.reserved_until;
        }
        self.last_updated = now;
    }
}

/// Filter for listing spots
#[derive(Debug, Clone, Default)]
pub struct SpotFilter {
    pub status: Option<SpotStatus>,
    pub zone: Option<String>,
}

impl SpotFilter {
    pub fn with_status(status: SpotStatus) -> Self {
        Self {
            status: Some(status),
            zone: None,
        }
    }

    pub fn matches(&self, spot: &Spot) -> bool {
        self.status.map_or(true, |s| spot.status == s)
            && self
                .zone
                .as_deref()
                .map_or(true, |z| spot.zone.eq_ignore_ascii_case(z))
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn occupant() -> Occupant {
        Occupant {
            plate: "ABC-1".into(),
            name: "Ada".into(),
        }
    }

    #[test]
    fn new_spot_is_available() {
        let spot = Spot::new("A1", "A", Utc::now());
        assert!(spot.is_available());
        assert_eq!(spot.version, 0);
        assert!(spot.occupant_plate().is_none());
    }

    #[test]
    fn apply_held_sets_owner_fields() {
        let now = Utc::now();
        let mut spot = Spot::new("A1", "A", now);
        let later = now + Duration::seconds(5);

        spot.apply(
            SpotAssignment::held(SpotStatus::Reserved, occupant(), "R1", now + Duration::minutes(30)),
            later,
        );

        assert_eq!(spot.status, SpotStatus::Reserved);
        assert_eq!(spot.occupant_plate(), Some("ABC-1"));
        assert_eq!(spot.reservation_id.as_deref(), Some("R1"));
        assert_eq!(spot.last_updated, later);
    }

    #[test]
    fn apply_available_clears_owner_fields_even_if_given() {
        let now = Utc::now();
        let mut spot = Spot::new("A1", "A", now);
        spot.apply(SpotAssignment::held(SpotStatus::Occupied, occupant(), "R1", now), now);

        let mut freed = SpotAssignment::vacant();
        freed.occupant = Some(occupant());
        spot.apply(freed, now);

        assert!(spot.is_available());
        assert!(spot.occupant.is_none());
        assert!(spot.reservation_id.is_none());
        assert!(spot.reserved_until.is_none());
    }

    #[test]
    fn status_parse_accepts_any_case() {
        assert_eq!(SpotStatus::parse(" Maintenance "), Some(SpotStatus::Maintenance));
        assert_eq!(SpotStatus::parse("RESERVED"), Some(SpotStatus::Reserved));
        assert_eq!(SpotStatus::parse("closed"), None);
    }

    #[test]
    fn filter_by_status_and_zone() {
        let now = Utc::now();
        let a1 = Spot::new("A1", "A", now);
        let mut b1 = Spot::new("B1", "B", now);
        b1.status = SpotStatus::Maintenance;

        let available = SpotFilter::with_status(SpotStatus::Available);
        assert!(available.matches(&a1));
        assert!(!available.matches(&b1));

        let zone_b = SpotFilter {
            zone: Some("b".into()),
            ..Default::default()
        };
        assert!(zone_b.matches(&b1));
        assert!(!zone_b.matches(&a1));
    }
}
