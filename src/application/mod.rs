//! Application layer: parking services, events and outbound ports

pub mod events;
pub mod parking;
pub mod ports;

pub use events::{create_event_bus, Event, EventBus, EventSubscriber, SharedEventBus};
pub use parking::{
    AdminService, DetectionEvent, DetectionListener, DetectionPoller, DetectionPublisher,
    ExpirationSweeper, LifecycleManager, NewReservation, OccupancySummary, SpotRegistry,
    SweepReport, WaitlistDispatcher,
};
pub use ports::{DetectionFeed, NotificationChannel, NotificationError};
