//! Tunable timing and buffering constants

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PartyError, Result};

/// Default drift a guest tolerates before hard-seeking (seconds)
const DEFAULT_DRIFT_TOLERANCE_SECS: f64 = 2.0;

/// Position jump (beyond extrapolation) that counts as a host seek (seconds)
const DEFAULT_SEEK_DETECTION_SECS: f64 = 1.0;

/// Heartbeat broadcast interval while the host is playing
const DEFAULT_HEARTBEAT_MS: u64 = 5_000;

/// Host is considered disconnected after this long without a report
const DEFAULT_HOST_TIMEOUT_MS: u64 = 15_000;

/// An empty live room ends after this long without a rejoin
const DEFAULT_GRACE_MS: u64 = 60_000;

/// Events kept per room for late joiners
const DEFAULT_HISTORY_CAPACITY: usize = 200;

/// Events replayed to a fresh subscriber without a cursor
const DEFAULT_REPLAY_COUNT: usize = 50;

/// Synchronization settings shared by every room of a hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub drift_tolerance_secs: f64,
    pub seek_detection_secs: f64,
    pub heartbeat_interval_ms: u64,
    pub host_timeout_ms: u64,
    pub grace_period_ms: u64,
    pub history_capacity: usize,
    pub replay_count: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drift_tolerance_secs: DEFAULT_DRIFT_TOLERANCE_SECS,
            seek_detection_secs: DEFAULT_SEEK_DETECTION_SECS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_MS,
            host_timeout_ms: DEFAULT_HOST_TIMEOUT_MS,
            grace_period_ms: DEFAULT_GRACE_MS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            replay_count: DEFAULT_REPLAY_COUNT,
        }
    }
}

impl SyncConfig {
    /// Defaults overlaid with any `PARTY_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_value("PARTY_DRIFT_TOLERANCE_SECS") {
            config.drift_tolerance_secs = v;
        }
        if let Some(v) = env_value("PARTY_HEARTBEAT_MS") {
            config.heartbeat_interval_ms = v;
        }
        if let Some(v) = env_value("PARTY_HOST_TIMEOUT_MS") {
            config.host_timeout_ms = v;
        }
        if let Some(v) = env_value("PARTY_GRACE_MS") {
            config.grace_period_ms = v;
        }
        if let Some(v) = env_value("PARTY_HISTORY_CAPACITY") {
            config.history_capacity = v;
        }
        if let Some(v) = env_value("PARTY_REPLAY_COUNT") {
            config.replay_count = v;
        }
        config
    }

    /// Reject settings that would break the timers or the replay buffer
    pub fn validate(&self) -> Result<()> {
        if !(self.drift_tolerance_secs.is_finite() && self.drift_tolerance_secs > 0.0) {
            return Err(PartyError::Validation(
                "drift tolerance must be a positive number of seconds".to_string(),
            ));
        }
        if !(self.seek_detection_secs.is_finite() && self.seek_detection_secs > 0.0) {
            return Err(PartyError::Validation(
                "seek detection threshold must be positive".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 || self.host_timeout_ms == 0 || self.grace_period_ms == 0 {
            return Err(PartyError::Validation(
                "heartbeat, host timeout and grace period must be non-zero".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(PartyError::Validation("history capacity must be non-zero".to_string()));
        }
        if self.replay_count > self.history_capacity {
            return Err(PartyError::Validation(format!(
                "replay count {} exceeds history capacity {}",
                self.replay_count, self.history_capacity
            )));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn host_timeout(&self) -> Duration {
        Duration::from_millis(self.host_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

fn env_value<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}
