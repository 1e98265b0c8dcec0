//! Ports for external collaborators

pub mod outbound;

pub use outbound::{DetectionFeed, NotificationChannel, NotificationError};
