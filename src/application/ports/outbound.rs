//! Outbound ports: contracts for external collaborators
//!
//! The lifecycle engine only talks to the outside world through these
//! traits: a best-effort notification channel and the plate detection feed.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Recipient rejected: {0}")]
    InvalidRecipient(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Best-effort message delivery (SMS, e-mail, push).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, contact: &str, message: &str) -> Result<(), NotificationError>;
}

/// Rolling-window lookup over recent plate detections.
#[async_trait]
pub trait DetectionFeed: Send + Sync {
    async fn was_detected_recently(&self, plate: &str, window_minutes: u32) -> bool;

    /// Latest detection time for `plate` within the window, if any.
    async fn last_detection(
        &self,
        plate: &str,
        window_minutes: u32,
    ) -> Option<chrono::DateTime<chrono::Utc>>;
}
