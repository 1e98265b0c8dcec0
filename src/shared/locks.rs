//! Per-key mutual exclusion with a bounded wait.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{DomainError, DomainResult};

/// One async mutex per spot id, created lazily.
///
/// Every command that touches a spot together with its owning reservation
/// holds the spot's guard for the whole read-validate-write sequence.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

pub type KeyGuard = OwnedMutexGuard<()>;

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, giving up after `wait` with
    /// `ConcurrentModification`.
    pub async fn acquire(&self, key: &str, wait: Duration) -> DomainResult<KeyGuard> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        tokio::time::timeout(wait, lock.lock_owned())
            .await
            .map_err(|_| DomainError::conflict("spot", key))
    }

    /// Number of keys that have been locked at least once.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
