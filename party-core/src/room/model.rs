//! Room and participant records

use serde::{Deserialize, Serialize};

use super::RoomId;
use crate::error::{PartyError, Result};
use crate::identity::{Identity, Role, UserId};
use crate::sync::PlaybackState;

/// Room lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Scheduled,
    Live,
    Ended,
    Cancelled,
}

impl RoomStatus {
    /// scheduled → live → ended, or scheduled/live → cancelled. Never backward.
    pub fn can_transition_to(self, next: RoomStatus) -> bool {
        matches!(
            (self, next),
            (RoomStatus::Scheduled, RoomStatus::Live)
                | (RoomStatus::Live, RoomStatus::Ended)
                | (RoomStatus::Scheduled, RoomStatus::Cancelled)
                | (RoomStatus::Live, RoomStatus::Cancelled)
        )
    }

    /// Scheduled or live: the room still accepts joins and chat
    pub fn is_open(self) -> bool {
        matches!(self, RoomStatus::Scheduled | RoomStatus::Live)
    }
}

impl std::fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RoomStatus::Scheduled => "scheduled",
            RoomStatus::Live => "live",
            RoomStatus::Ended => "ended",
            RoomStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Settings supplied when scheduling a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomConfig {
    pub title: String,
    /// Playable URL or external provider id, relayed as-is
    pub media_reference: String,
    #[serde(default)]
    pub poster_url: Option<String>,
    /// Defaults to now
    #[serde(default)]
    pub scheduled_at_ms: Option<u64>,
    pub max_participants: u32,
    #[serde(default = "default_public")]
    pub is_public: bool,
    #[serde(default)]
    pub is_vtuber_event: bool,
}

fn default_public() -> bool {
    true
}

impl RoomConfig {
    pub fn new(title: impl Into<String>, media_reference: impl Into<String>, max_participants: u32) -> Self {
        Self {
            title: title.into(),
            media_reference: media_reference.into(),
            poster_url: None,
            scheduled_at_ms: None,
            max_participants,
            is_public: true,
            is_vtuber_event: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_participants < 1 {
            return Err(PartyError::Validation(
                "max participants must be at least 1".to_string(),
            ));
        }
        if self.media_reference.trim().is_empty() {
            return Err(PartyError::Validation("media reference must not be empty".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(PartyError::Validation("title must not be empty".to_string()));
        }
        Ok(())
    }
}

/// A watch-party room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub title: String,
    pub media_reference: String,
    pub poster_url: Option<String>,
    pub status: RoomStatus,
    pub scheduled_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub ended_at_ms: Option<u64>,
    pub max_participants: u32,
    pub is_public: bool,
    pub is_vtuber_event: bool,
    /// Designated host: the only user allowed to start the room
    pub created_by: UserId,
}

impl Room {
    pub(crate) fn from_config(id: RoomId, creator: &UserId, config: RoomConfig, now_ms: u64) -> Self {
        Self {
            id,
            title: config.title,
            media_reference: config.media_reference,
            poster_url: config.poster_url,
            status: RoomStatus::Scheduled,
            scheduled_at_ms: config.scheduled_at_ms.unwrap_or(now_ms),
            started_at_ms: None,
            ended_at_ms: None,
            max_participants: config.max_participants,
            is_public: config.is_public,
            is_vtuber_event: config.is_vtuber_event,
            created_by: creator.clone(),
        }
    }
}

/// One stay of a user in a room. A user who leaves and comes back gets a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub joined_at_ms: u64,
    pub left_at_ms: Option<u64>,
    pub is_host: bool,
    pub is_co_host: bool,
}

impl Participant {
    pub(crate) fn new(room_id: RoomId, identity: &Identity, now_ms: u64) -> Self {
        Self {
            user_id: identity.user_id.clone(),
            room_id,
            display_name: identity.display_name.clone(),
            avatar_url: identity.avatar_url.clone(),
            role: identity.role,
            joined_at_ms: now_ms,
            left_at_ms: None,
            is_host: false,
            is_co_host: false,
        }
    }

    pub fn is_present(&self) -> bool {
        self.left_at_ms.is_none()
    }
}

/// Consistent view of a room, its present roster and playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room: Room,
    /// Present participants in join order
    pub participants: Vec<Participant>,
    pub host_id: Option<UserId>,
    pub host_generation: u64,
    /// Only while live
    pub playback: Option<PlaybackState>,
}

impl RoomSnapshot {
    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }
}

/// Listing entry for room discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room: Room,
    pub participant_count: u32,
}

/// Discovery filter; only public rooms are ever listed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomFilter {
    #[serde(default)]
    pub status: Option<RoomStatus>,
    #[serde(default)]
    pub vtuber_only: bool,
}

impl RoomFilter {
    pub fn matches(&self, room: &Room) -> bool {
        room.is_public
            && self.status.map_or(true, |status| room.status == status)
            && (!self.vtuber_only || room.is_vtuber_event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use RoomStatus::*;
        assert!(Scheduled.can_transition_to(Live));
        assert!(Live.can_transition_to(Ended));
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(Live.can_transition_to(Cancelled));

        assert!(!Live.can_transition_to(Scheduled));
        assert!(!Ended.can_transition_to(Live));
        assert!(!Scheduled.can_transition_to(Ended));
        assert!(!Cancelled.can_transition_to(Live));
        assert!(!Ended.can_transition_to(Cancelled));
    }

    #[test]
    fn test_config_validation() {
        assert!(RoomConfig::new("Movie night", "https://cdn.example/film.m3u8", 4).validate().is_ok());
        assert!(matches!(
            RoomConfig::new("Movie night", "https://cdn.example/film.m3u8", 0).validate(),
            Err(PartyError::Validation(_))
        ));
        assert!(matches!(
            RoomConfig::new("Movie night", "  ", 4).validate(),
            Err(PartyError::Validation(_))
        ));
    }

    #[test]
    fn test_filter_hides_private_rooms() {
        let mut room = Room::from_config(
            RoomId::random(),
            &"alice".to_string(),
            RoomConfig::new("Premiere", "yt:abc", 10),
            0,
        );
        let filter = RoomFilter::default();
        assert!(filter.matches(&room));

        let vtuber = RoomFilter { status: None, vtuber_only: true };
        assert!(!vtuber.matches(&room));
        room.is_vtuber_event = true;
        assert!(vtuber.matches(&room));

        room.is_public = false;
        assert!(!filter.matches(&room));
    }
}
