//! Configuration module
//!
//! Reads TOML from `~/.config/smartpark/config.toml` (or `SMARTPARK_CONFIG`).
//! Every section falls back to defaults, so an empty file is valid.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{SpotStatus, SystemToggles};
use crate::shared::RetryConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub lifecycle: LifecycleConfig,
    pub sweeper: SweeperConfig,
    pub detection: DetectionConfig,
    pub toggles: SystemToggles,
    pub metrics: MetricsConfig,
    pub shutdown_timeout_secs: u64,
    /// Spots registered at startup
    pub spots: Vec<SpotSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error (or a full `EnvFilter` directive)
    pub level: String,
    /// "text" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Reservation timing and concurrency bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long a reservation may wait for its vehicle
    pub waiting_timeout_minutes: u32,
    /// Fixed window that starts on detection
    pub active_duration_minutes: u32,
    /// Requested duration for reservations made from the waitlist
    pub waitlist_duration_minutes: u32,
    /// Longest wait for a per-spot lock
    pub lock_timeout_ms: u64,
    /// Attempts per command on version conflicts
    pub max_retries: u32,
    pub retry_initial_delay_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            waiting_timeout_minutes: 30,
            active_duration_minutes: 15,
            waitlist_duration_minutes: 60,
            lock_timeout_ms: 2_000,
            max_retries: 3,
            retry_initial_delay_ms: 10,
        }
    }
}

impl LifecycleConfig {
    pub fn waiting_timeout(&self) -> Duration {
        Duration::minutes(i64::from(self.waiting_timeout_minutes))
    }

    pub fn active_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.active_duration_minutes))
    }

    pub fn lock_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.lock_timeout_ms)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries,
            initial_delay: StdDuration::from_millis(self.retry_initial_delay_ms),
            ..RetryConfig::default()
        }
    }
}

/// What the sweeper does with active reservations past their end time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverstayPolicy {
    /// Publish one overstay event and leave the reservation active
    #[default]
    Advisory,
    /// Complete the reservation and free the spot
    AutoComplete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub interval_secs: u64,
    /// Random delay added to each tick, 0 to disable
    pub jitter_ms: u64,
    pub overstay_policy: OverstayPolicy,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            jitter_ms: 0,
            overstay_policy: OverstayPolicy::Advisory,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Rolling window for "seen recently" lookups
    pub window_minutes: u32,
    /// Enables the polling fallback when set
    pub poll_interval_secs: Option<u64>,
    /// Buffer size of the push channel
    pub channel_capacity: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_minutes: 5,
            poll_interval_secs: None,
            channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus listener address, e.g. "0.0.0.0:9090"
    pub listen: Option<String>,
}

/// Spot registered at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotSeed {
    pub id: String,
    pub zone: String,
    /// Initial status, `available` when omitted
    #[serde(default)]
    pub status: Option<SpotStatus>,
}

impl AppConfig {
    /// Load from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&raw)?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweeper.interval_secs == 0 {
            return Err(ConfigError::Invalid("sweeper.interval_secs must be > 0".into()));
        }
        if self.lifecycle.waiting_timeout_minutes == 0 {
            return Err(ConfigError::Invalid(
                "lifecycle.waiting_timeout_minutes must be > 0".into(),
            ));
        }
        if self.lifecycle.active_duration_minutes == 0 {
            return Err(ConfigError::Invalid(
                "lifecycle.active_duration_minutes must be > 0".into(),
            ));
        }
        if self.lifecycle.waitlist_duration_minutes == 0 {
            return Err(ConfigError::Invalid(
                "lifecycle.waitlist_duration_minutes must be > 0".into(),
            ));
        }
        if self.lifecycle.lock_timeout_ms == 0 || self.lifecycle.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "lifecycle.lock_timeout_ms and lifecycle.max_retries must be > 0".into(),
            ));
        }
        if self.detection.poll_interval_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "detection.poll_interval_secs must be > 0 when set".into(),
            ));
        }
        if self.detection.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "detection.channel_capacity must be > 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for spot in &self.spots {
            if spot.id.trim().is_empty() {
                return Err(ConfigError::Invalid("spot id must not be empty".into()));
            }
            if !seen.insert(spot.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate spot id {}", spot.id)));
            }
            if matches!(spot.status, Some(s) if s.is_held()) {
                return Err(ConfigError::Invalid(format!(
                    "spot {} cannot start reserved or occupied without a reservation",
                    spot.id
                )));
            }
        }
        Ok(())
    }

    pub fn shutdown_timeout_secs(&self) -> u64 {
        if self.shutdown_timeout_secs == 0 {
            10
        } else {
            self.shutdown_timeout_secs
        }
    }
}

/// `~/.config/smartpark/config.toml`, or `./config.toml` without a home dir.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .map(|dir| dir.join("smartpark").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.lifecycle.waiting_timeout_minutes, 30);
        assert_eq!(config.lifecycle.active_duration_minutes, 15);
        assert_eq!(config.sweeper.interval_secs, 30);
        assert_eq!(config.sweeper.overstay_policy, OverstayPolicy::Advisory);
        assert!(config.toggles.system_enabled);
        assert_eq!(config.shutdown_timeout_secs(), 10);
    }

    #[test]
    fn parses_sections_and_spots() {
        let raw = r#"
            shutdown_timeout_secs = 5

            [logging]
            level = "debug"
            format = "json"

            [sweeper]
            interval_secs = 45
            overstay_policy = "auto_complete"

            [detection]
            window_minutes = 3
            poll_interval_secs = 10

            [toggles]
            disabled_zones = ["C"]

            [[spots]]
            id = "A1"
            zone = "A"

            [[spots]]
            id = "C1"
            zone = "C"
            status = "maintenance"
        "#;

        let config = AppConfig::from_toml(raw).unwrap();
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.sweeper.interval_secs, 45);
        assert_eq!(config.sweeper.overstay_policy, OverstayPolicy::AutoComplete);
        assert_eq!(config.detection.poll_interval_secs, Some(10));
        assert!(config.toggles.zone_disabled("C"));
        assert_eq!(config.spots.len(), 2);
        assert_eq!(config.spots[1].status, Some(SpotStatus::Maintenance));
        assert_eq!(config.shutdown_timeout_secs(), 5);
    }

    #[test]
    fn rejects_duplicate_spots() {
        let raw = r#"
            [[spots]]
            id = "A1"
            zone = "A"
            [[spots]]
            id = "A1"
            zone = "B"
        "#;
        assert!(matches!(AppConfig::from_toml(raw), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_sweep_interval() {
        let raw = "[sweeper]\ninterval_secs = 0\n";
        assert!(matches!(AppConfig::from_toml(raw), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_waitlist_duration() {
        let raw = "[lifecycle]\nwaitlist_duration_minutes = 0\n";
        assert!(matches!(AppConfig::from_toml(raw), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_held_seed_status() {
        let raw = "[[spots]]\nid = \"A1\"\nzone = \"A\"\nstatus = \"occupied\"\n";
        assert!(AppConfig::from_toml(raw).is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/smartpark.toml")).unwrap();
        assert!(config.spots.is_empty());
    }

    #[test]
    fn lifecycle_durations() {
        let lifecycle = LifecycleConfig::default();
        assert_eq!(lifecycle.waiting_timeout(), Duration::minutes(30));
        assert_eq!(lifecycle.active_duration(), Duration::minutes(15));
        assert_eq!(lifecycle.retry().max_attempts, 3);
    }
}
