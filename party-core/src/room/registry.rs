//! Process-wide room registry
//!
//! Each room sits behind its own mutex, the single serialization point for its
//! roster, playback track and host generation. The registry lock is only held
//! long enough to look an entry up; it is never held while a room is locked.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use super::{Participant, Room, RoomId, RoomSnapshot, RoomStatus};
use crate::chat::ChatLog;
use crate::error::{PartyError, Result};
use crate::sync::PlaybackTrack;
use crate::timer::RoomTimers;

pub(crate) type RoomEntry = Arc<Mutex<RoomInner>>;

/// Everything the core knows about one room
#[derive(Debug)]
pub(crate) struct RoomInner {
    pub room: Room,
    /// Present participants in join order; a departure removes its record
    pub participants: Vec<Participant>,
    /// Present only while live
    pub playback: Option<PlaybackTrack>,
    /// Last report from the current host, or the moment it became host
    pub last_host_contact: Instant,
    pub chat: ChatLog,
    pub timers: RoomTimers,
    /// Set once the room has been removed from the registry
    pub archived: bool,
}

impl RoomInner {
    pub fn new(room: Room) -> Self {
        let chat = ChatLog::new(room.id.clone());
        Self {
            room,
            participants: Vec::new(),
            playback: None,
            last_host_contact: Instant::now(),
            chat,
            timers: RoomTimers::default(),
            archived: false,
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.room.id
    }

    pub fn present(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    pub fn present_count(&self) -> usize {
        self.present().count()
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.present().find(|p| p.user_id == user_id)
    }

    pub fn participant_mut(&mut self, user_id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.user_id == user_id)
    }

    /// Present participant or `NotAuthorized`
    pub fn require_participant(&self, user_id: &str) -> Result<&Participant> {
        self.participant(user_id).ok_or_else(|| {
            PartyError::NotAuthorized(format!("{} is not in room {}", user_id, self.room.id))
        })
    }

    pub fn host_id(&self) -> Option<&str> {
        self.playback.as_ref().and_then(|track| track.host_id())
    }

    pub fn generation(&self) -> u64 {
        self.playback.as_ref().map_or(0, |track| track.generation())
    }

    pub fn is_host(&self, user_id: &str) -> bool {
        self.host_id() == Some(user_id)
    }

    /// Longest-tenured present participant, join order breaking ties
    pub fn longest_tenured(&self) -> Option<&Participant> {
        self.present().min_by_key(|p| p.joined_at_ms)
    }

    pub fn ensure_status(&self, expected: RoomStatus, action: &str) -> Result<()> {
        if self.room.status != expected {
            return Err(PartyError::InvalidState(format!(
                "cannot {} room {} while it is {}",
                action, self.room.id, self.room.status
            )));
        }
        Ok(())
    }

    pub fn ensure_open(&self, action: &str) -> Result<()> {
        if !self.room.status.is_open() {
            return Err(PartyError::InvalidState(format!(
                "cannot {} in room {} after it {}",
                action, self.room.id, self.room.status
            )));
        }
        Ok(())
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room: self.room.clone(),
            participants: self.present().cloned().collect(),
            host_id: self.host_id().map(str::to_string),
            host_generation: self.generation(),
            playback: self.playback.as_ref().map(|track| track.state().clone()),
        }
    }
}

#[derive(Default)]
pub(crate) struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, RoomEntry>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the id is already taken
    pub fn insert(&self, inner: RoomInner) -> bool {
        let mut rooms = self.rooms.write();
        if rooms.contains_key(inner.id()) {
            return false;
        }
        rooms.insert(inner.id().clone(), Arc::new(Mutex::new(inner)));
        true
    }

    pub fn get(&self, room_id: &RoomId) -> Result<RoomEntry> {
        self.rooms
            .read()
            .get(room_id)
            .cloned()
            .ok_or_else(|| PartyError::room_not_found(room_id))
    }

    pub fn remove(&self, room_id: &RoomId) -> Option<RoomEntry> {
        self.rooms.write().remove(room_id)
    }

    pub fn entries(&self) -> Vec<RoomEntry> {
        self.rooms.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.read().len()
    }
}
