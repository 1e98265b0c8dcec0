//! Domain layer: entities, state machines, and store contracts.

pub mod audit;
pub mod clock;
pub mod error;
pub mod events;
pub mod reservation;
pub mod settings;
pub mod spot;
pub mod waitlist;

pub use audit::{AuditLog, SpotOverrideEntry, SystemActionEntry};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use reservation::{
    normalize_plate, Reservation, ReservationFilter, ReservationStatus, ReservationStore,
};
pub use settings::{SettingsProvider, SharedSettings, SystemToggles};
pub use spot::{Occupant, Spot, SpotAssignment, SpotFilter, SpotStatus, SpotStore};
pub use waitlist::{WaitlistEntry, WaitlistQueue};
