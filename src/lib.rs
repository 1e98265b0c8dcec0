//! # SmartPark reservation engine
//!
//! Parking spot reservation lifecycle and waitlist allocation.
//!
//! ## Architecture
//!
//! - **domain**: Spots, reservations, waitlist entries, audit records, events and store contracts
//! - **application**: Lifecycle manager, expiration sweeper, waitlist dispatcher, detection intake, admin actions
//! - **infrastructure**: In-memory stores, detection feed and notification adapters
//! - **runtime**: Wiring, background tasks and graceful shutdown

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod runtime;
pub mod shared;

pub use config::{default_config_path, AppConfig};

pub use application::{
    create_event_bus, AdminService, DetectionEvent, Event, EventBus, ExpirationSweeper,
    LifecycleManager, NewReservation, SharedEventBus, SpotRegistry, WaitlistDispatcher,
};
pub use domain::{DomainError, DomainResult, Reservation, ReservationStatus, Spot, SpotStatus};
pub use runtime::{init_tracing, ServiceHandle};
