//! Notification channel adapters

use async_trait::async_trait;
use tracing::info;

use crate::application::ports::{NotificationChannel, NotificationError};

/// Writes messages to the log instead of delivering them.
///
/// Stand-in for an SMS or e-mail gateway when none is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotificationChannel;

#[async_trait]
impl NotificationChannel for LogNotificationChannel {
    async fn send(&self, contact: &str, message: &str) -> Result<(), NotificationError> {
        if contact.trim().is_empty() {
            return Err(NotificationError::InvalidRecipient("empty contact".into()));
        }
        info!(contact, message, "✉️ Notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_contact_is_rejected() {
        let channel = LogNotificationChannel;
        assert!(channel.send("", "hi").await.is_err());
        assert!(channel.send("ada@example.com", "hi").await.is_ok());
    }
}
