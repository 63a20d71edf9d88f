//! FFI types exposed via uniffi

use crate::client::{Correction, LocalPlayback};
use crate::sync::HostReport;

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum FfiError {
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),
}

/// What the native player is doing
#[derive(Debug, Clone, Copy, uniffi::Record)]
pub struct LocalPlaybackState {
    pub position_secs: f64,
    pub is_playing: bool,
    pub playback_rate: f64,
}

impl From<LocalPlaybackState> for LocalPlayback {
    fn from(l: LocalPlaybackState) -> Self {
        Self {
            position_secs: l.position_secs,
            is_playing: l.is_playing,
            playback_rate: l.playback_rate,
        }
    }
}

/// Adjustments the native player should make
#[derive(Debug, Clone, uniffi::Record)]
pub struct SyncCorrection {
    /// Seek here, if set
    pub seek_to_secs: Option<f64>,
    pub set_playing: Option<bool>,
    pub set_rate: Option<f64>,
    pub drift_secs: f64,
    pub estimated_position_secs: f64,
}

impl From<Correction> for SyncCorrection {
    fn from(c: Correction) -> Self {
        Self {
            seek_to_secs: c.seek_to,
            set_playing: c.set_playing,
            set_rate: c.set_rate,
            drift_secs: c.drift_secs,
            estimated_position_secs: c.estimated_position_secs,
        }
    }
}

/// Host report to send upstream
#[derive(Debug, Clone, uniffi::Record)]
pub struct HostStateReport {
    pub participant_id: String,
    pub generation: u64,
    pub position_secs: f64,
    pub is_playing: bool,
    pub playback_rate: f64,
    pub reported_at_ms: u64,
    /// Same report, ready to forward as JSON
    pub json: String,
}

impl HostStateReport {
    pub(crate) fn from_report(report: HostReport) -> Self {
        let json = serde_json::to_string(&report).unwrap_or_default();
        Self {
            participant_id: report.participant_id,
            generation: report.generation,
            position_secs: report.position_secs,
            is_playing: report.is_playing,
            playback_rate: report.playback_rate,
            reported_at_ms: report.reported_at_ms,
            json,
        }
    }
}
