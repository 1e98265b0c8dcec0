//! Audit trail for operator actions that bypass the reservation lifecycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::spot::SpotStatus;
use crate::domain::DomainResult;

/// Forced spot status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotOverrideEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub spot_id: String,
    pub old_status: SpotStatus,
    pub new_status: SpotStatus,
    pub reason: String,
}

/// Toggle change or other system-wide action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemActionEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub reason: String,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record_override(&self, entry: SpotOverrideEntry) -> DomainResult<()>;

    async fn record_system_action(&self, entry: SystemActionEntry) -> DomainResult<()>;

    async fn overrides(&self) -> DomainResult<Vec<SpotOverrideEntry>>;

    async fn system_actions(&self) -> DomainResult<Vec<SystemActionEntry>>;
}
