//! Authoritative playback state and host-generation fencing

use serde::{Deserialize, Serialize};

use super::protocol::{HostReport, PlaybackSnapshot, PlaybackState, SyncReason};
use crate::identity::UserId;

/// What happened to a host report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// State was replaced; `change` is set when it warrants an immediate broadcast
    Accepted { change: Option<SyncReason> },
    /// Report was discarded without touching state
    Dropped(DropReason),
}

impl ReportOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ReportOutcome::Accepted { .. })
    }
}

/// Why a report was discarded. Routine under jitter, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Malformed,
    NoHost,
    StaleGeneration,
    NotHost,
    OutOfOrder,
}

/// Playback state of one live room, guarded by the room lock
#[derive(Debug, Clone)]
pub struct PlaybackTrack {
    state: PlaybackState,
    generation: u64,
    host_id: Option<UserId>,
    /// After a hand-off the new host's next report wins regardless of timestamps
    awaiting_seed: bool,
}

impl PlaybackTrack {
    /// Initial state for a room going live with `host_id` (generation 1)
    pub fn begin(host_id: UserId, now_ms: u64) -> Self {
        Self {
            state: PlaybackState::initial(host_id.clone(), now_ms),
            generation: 1,
            host_id: Some(host_id),
            awaiting_seed: true,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn host_id(&self) -> Option<&str> {
        self.host_id.as_deref()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            state: self.state.clone(),
            generation: self.generation,
            host_id: self.host_id.clone(),
        }
    }

    /// Move authority to `new_host` (or to nobody) and fence the old generation.
    ///
    /// Returns the new generation.
    pub fn hand_off(&mut self, new_host: Option<UserId>) -> u64 {
        self.generation += 1;
        self.host_id = new_host;
        self.awaiting_seed = true;
        self.generation
    }

    /// Apply a host report.
    ///
    /// Accepted only from the current host, tagged with the current generation,
    /// and not older than the last accepted report (unless this is the first
    /// report after a hand-off).
    pub fn accept(&mut self, report: HostReport, seek_threshold_secs: f64) -> ReportOutcome {
        if !report.is_well_formed() {
            return ReportOutcome::Dropped(DropReason::Malformed);
        }
        let Some(host_id) = self.host_id.as_deref() else {
            return ReportOutcome::Dropped(DropReason::NoHost);
        };
        if report.generation != self.generation {
            return ReportOutcome::Dropped(DropReason::StaleGeneration);
        }
        if report.participant_id != host_id {
            return ReportOutcome::Dropped(DropReason::NotHost);
        }
        if !self.awaiting_seed && report.reported_at_ms < self.state.updated_at_ms {
            return ReportOutcome::Dropped(DropReason::OutOfOrder);
        }

        let change = classify_change(&self.state, &report, seek_threshold_secs);
        self.state = report.into_state();
        self.awaiting_seed = false;
        ReportOutcome::Accepted { change }
    }
}

/// Discrete host actions that guests must see right away
fn classify_change(
    previous: &PlaybackState,
    report: &HostReport,
    seek_threshold_secs: f64,
) -> Option<SyncReason> {
    if previous.is_playing != report.is_playing {
        return Some(if report.is_playing {
            SyncReason::Play
        } else {
            SyncReason::Pause
        });
    }
    if (previous.playback_rate - report.playback_rate).abs() > f64::EPSILON {
        return Some(SyncReason::RateChange);
    }
    let expected = previous.position_at(report.reported_at_ms);
    if (report.position_secs - expected).abs() > seek_threshold_secs {
        return Some(SyncReason::Seek);
    }
    None
}
