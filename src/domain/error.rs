//! Domain errors

use thiserror::Error;

/// Typed failures returned by lifecycle commands and the stores beneath them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("Spot {spot_id} is unavailable: {reason}")]
    SpotUnavailable { spot_id: String, reason: String },

    /// State machine precondition unmet. Expected under races.
    #[error("Invalid transition for reservation {reservation_id}: cannot {action} from {from}")]
    InvalidTransition {
        reservation_id: String,
        from: String,
        action: &'static str,
    },

    #[error("Not found: {entity} {id}")]
    RecordNotFound { entity: &'static str, id: String },

    /// Optimistic version check failed or the per-spot lock wait ran out.
    #[error("Concurrent modification of {entity} {id}")]
    ConcurrentModification { entity: &'static str, id: String },

    #[error("Notification failed: {0}")]
    NotificationFailure(String),

    #[error("Validation: {0}")]
    Validation(String),

    #[error("Service disabled: {0}")]
    ServiceDisabled(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl DomainError {
    pub fn spot_unavailable(spot_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpotUnavailable {
            spot_id: spot_id.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::RecordNotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn conflict(entity: &'static str, id: impl Into<String>) -> Self {
        Self::ConcurrentModification {
            entity,
            id: id.into(),
        }
    }

    /// Whether the caller should re-read and try the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }

    /// Whether this is an expected race outcome rather than an operational fault.
    pub fn is_expected_race(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

/// Result type for domain operations
pub type DomainResult<T> = Result<T, DomainError>;
