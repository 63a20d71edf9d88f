//! Sync Protocol Messages

use serde::{Deserialize, Serialize};

use crate::chat::{Message, MessageId};
use crate::identity::UserId;
use crate::room::{RoomId, RoomSnapshot};

/// Authoritative playback state of a live room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    /// Media position in seconds
    pub position_secs: f64,
    /// Whether the host is playing
    pub is_playing: bool,
    /// Playback speed multiplier
    pub playback_rate: f64,
    /// Host-side timestamp of the report this state came from (ms since epoch)
    pub updated_at_ms: u64,
    /// Participant whose report produced this state
    pub source_participant_id: UserId,
}

impl PlaybackState {
    /// Paused at the start, as a room is when it goes live
    pub fn initial(host_id: UserId, now_ms: u64) -> Self {
        Self {
            position_secs: 0.0,
            is_playing: false,
            playback_rate: 1.0,
            updated_at_ms: now_ms,
            source_participant_id: host_id,
        }
    }

    /// Host position extrapolated to `now_ms`.
    ///
    /// Time running backwards (clock skew) counts as zero elapsed.
    pub fn position_at(&self, now_ms: u64) -> f64 {
        if !self.is_playing {
            return self.position_secs;
        }
        let elapsed_secs = now_ms.saturating_sub(self.updated_at_ms) as f64 / 1000.0;
        self.position_secs + elapsed_secs * self.playback_rate
    }
}

/// A playback report from the host's player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostReport {
    pub participant_id: UserId,
    /// Host generation the reporter believes it holds
    pub generation: u64,
    pub position_secs: f64,
    pub is_playing: bool,
    pub playback_rate: f64,
    pub reported_at_ms: u64,
}

impl HostReport {
    /// Non-negative finite position and positive finite rate
    pub fn is_well_formed(&self) -> bool {
        self.position_secs.is_finite()
            && self.position_secs >= 0.0
            && self.playback_rate.is_finite()
            && self.playback_rate > 0.0
    }

    pub(crate) fn into_state(self) -> PlaybackState {
        PlaybackState {
            position_secs: self.position_secs,
            is_playing: self.is_playing,
            playback_rate: self.playback_rate,
            updated_at_ms: self.reported_at_ms,
            source_participant_id: self.participant_id,
        }
    }
}

/// Why a sync correction was published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    /// Room went live or a client asked for the current state
    Snapshot,
    Play,
    Pause,
    Seek,
    RateChange,
    /// Periodic broadcast while playing
    Heartbeat,
    /// A new host was promoted
    HostChanged,
}

/// Authoritative state plus the fencing information clients need
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub generation: u64,
    pub host_id: Option<UserId>,
}

/// Events fanned out to every subscriber of a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    /// Text message or floating reaction
    ChatMessage(Message),

    /// Absolute count of one emoji on one message
    ReactionUpdate {
        message_id: MessageId,
        emoji: String,
        count: u32,
    },

    /// Authoritative playback state guests reconcile against
    SyncCorrection {
        state: PlaybackState,
        generation: u64,
        reason: SyncReason,
    },

    /// Join/leave/host/lifecycle notices
    SystemNotice(Message),

    /// A new poll
    PollMessage(Message),

    /// Full tally after a vote
    PollUpdate {
        message_id: MessageId,
        tallies: Vec<u32>,
    },

    MessagePinned {
        message_id: MessageId,
        pinned: bool,
    },

    /// Room, roster and host after any state transition
    RoomState(RoomSnapshot),
}

impl RoomEvent {
    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            RoomEvent::ChatMessage(_) => "chat",
            RoomEvent::ReactionUpdate { .. } => "reaction",
            RoomEvent::SyncCorrection { .. } => "sync",
            RoomEvent::SystemNotice(_) => "system",
            RoomEvent::PollMessage(_) => "poll",
            RoomEvent::PollUpdate { .. } => "poll_update",
            RoomEvent::MessagePinned { .. } => "pin",
            RoomEvent::RoomState(_) => "room_state",
        }
    }
}

/// A published event with its per-room sequence number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Strictly increasing within a room, starting at 1
    pub seq: u64,
    pub room_id: RoomId,
    pub event: RoomEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing(position_secs: f64, rate: f64, updated_at_ms: u64) -> PlaybackState {
        PlaybackState {
            position_secs,
            is_playing: true,
            playback_rate: rate,
            updated_at_ms,
            source_participant_id: "host".to_string(),
        }
    }

    #[test]
    fn test_position_extrapolates_while_playing() {
        let state = playing(10.0, 1.0, 1_000);
        assert!((state.position_at(4_000) - 13.0).abs() < 1e-9);

        let fast = playing(10.0, 2.0, 1_000);
        assert!((fast.position_at(4_000) - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_position_frozen_while_paused() {
        let mut state = playing(42.0, 1.0, 1_000);
        state.is_playing = false;
        assert_eq!(state.position_at(60_000), 42.0);
    }

    #[test]
    fn test_clock_skew_counts_as_zero_elapsed() {
        let state = playing(10.0, 1.0, 5_000);
        assert_eq!(state.position_at(1_000), 10.0);
    }

    #[test]
    fn test_malformed_reports() {
        let mut report = HostReport {
            participant_id: "host".to_string(),
            generation: 1,
            position_secs: 3.0,
            is_playing: true,
            playback_rate: 1.0,
            reported_at_ms: 0,
        };
        assert!(report.is_well_formed());

        report.position_secs = -1.0;
        assert!(!report.is_well_formed());

        report.position_secs = 1.0;
        report.playback_rate = 0.0;
        assert!(!report.is_well_formed());

        report.playback_rate = f64::NAN;
        assert!(!report.is_well_formed());
    }

    #[test]
    fn test_event_wire_tag() {
        let event = RoomEvent::MessagePinned { message_id: 7, pinned: true };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message_pinned");
        assert_eq!(json["message_id"], 7);
    }
}
