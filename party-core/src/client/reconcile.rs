//! Guest-side drift correction

use serde::{Deserialize, Serialize};

use crate::sync::PlaybackState;

/// Rates closer than this are the same rate
const RATE_EPSILON: f64 = 1e-6;

/// What the local player is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalPlayback {
    pub position_secs: f64,
    pub is_playing: bool,
    pub playback_rate: f64,
}

/// Adjustments a guest player should make. `None` fields need no action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    /// Hard seek target, set only when drift exceeds the tolerance
    pub seek_to: Option<f64>,
    pub set_playing: Option<bool>,
    pub set_rate: Option<f64>,
    /// |local - estimated| at the time of reconciliation
    pub drift_secs: f64,
    pub estimated_position_secs: f64,
}

impl Correction {
    pub fn is_noop(&self) -> bool {
        self.seek_to.is_none() && self.set_playing.is_none() && self.set_rate.is_none()
    }

    /// Drive a player. Seeks first so play resumes at the right spot.
    pub fn apply_to<P: Player + ?Sized>(&self, player: &mut P) {
        if let Some(position) = self.seek_to {
            player.seek(position);
        }
        if let Some(rate) = self.set_rate {
            player.set_rate(rate);
        }
        if let Some(playing) = self.set_playing {
            player.set_playing(playing);
        }
    }
}

/// A controllable media player
pub trait Player {
    fn seek(&mut self, position_secs: f64);
    fn set_playing(&mut self, playing: bool);
    fn set_rate(&mut self, rate: f64);
}

/// Decides whether and how hard a guest corrects against the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciler {
    tolerance_secs: f64,
}

impl Reconciler {
    pub fn new(tolerance_secs: f64) -> Self {
        Self { tolerance_secs }
    }

    pub fn tolerance_secs(&self) -> f64 {
        self.tolerance_secs
    }

    /// Compare local playback with the host's state extrapolated to `now_ms`.
    ///
    /// Position is only corrected beyond the tolerance, to avoid constant
    /// micro-seeks. Play state and rate are mirrored on any mismatch.
    pub fn reconcile(&self, state: &PlaybackState, local: &LocalPlayback, now_ms: u64) -> Correction {
        let estimated = state.position_at(now_ms);
        let drift = (local.position_secs - estimated).abs();

        Correction {
            seek_to: (drift > self.tolerance_secs).then_some(estimated),
            set_playing: (local.is_playing != state.is_playing).then_some(state.is_playing),
            set_rate: ((local.playback_rate - state.playback_rate).abs() > RATE_EPSILON)
                .then_some(state.playback_rate),
            drift_secs: drift,
            estimated_position_secs: estimated,
        }
    }
}
