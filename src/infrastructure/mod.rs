//! Infrastructure layer - external concerns

pub mod detection;
pub mod notification;
pub mod storage;

pub use detection::InMemoryDetectionFeed;
pub use notification::LogNotificationChannel;
pub use storage::{InMemoryAuditLog, InMemoryReservationStore, InMemorySpotStore, InMemoryWaitlist};
