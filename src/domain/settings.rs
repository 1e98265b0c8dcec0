//! Runtime enable/disable switches, read fresh on every operation.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Operator-controlled switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemToggles {
    /// Master switch. When off, no reservations are accepted and detections are ignored.
    pub system_enabled: bool,
    /// Whether plate detections activate reservations
    pub detection_enabled: bool,
    /// Whether new reservations are accepted
    pub reservations_enabled: bool,
    /// Zones closed for new reservations
    pub disabled_zones: Vec<String>,
}

impl Default for SystemToggles {
    fn default() -> Self {
        Self {
            system_enabled: true,
            detection_enabled: true,
            reservations_enabled: true,
            disabled_zones: Vec::new(),
        }
    }
}

impl SystemToggles {
    pub fn accepts_reservations(&self) -> bool {
        self.system_enabled && self.reservations_enabled
    }

    pub fn accepts_detections(&self) -> bool {
        self.system_enabled && self.detection_enabled
    }

    pub fn zone_disabled(&self, zone: &str) -> bool {
        self.disabled_zones.iter().any(|z| z.eq_ignore_ascii_case(zone))
    }
}

/// Accessor queried by the lifecycle manager on every command.
pub trait SettingsProvider: Send + Sync {
    fn toggles(&self) -> SystemToggles;
}

/// Toggles held in memory and replaced atomically by the admin service.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<SystemToggles>>,
}

impl SharedSettings {
    pub fn new(toggles: SystemToggles) -> Self {
        Self {
            inner: Arc::new(RwLock::new(toggles)),
        }
    }

    /// Replace the toggles, returning the previous value.
    pub fn replace(&self, toggles: SystemToggles) -> SystemToggles {
        match self.inner.write() {
            Ok(mut current) => std::mem::replace(&mut *current, toggles),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), toggles),
        }
    }
}

impl SettingsProvider for SharedSettings {
    fn toggles(&self) -> SystemToggles {
        match self.inner.read() {
            Ok(t) => t.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
