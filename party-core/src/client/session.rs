//! Per-room client state
//!
//! One session lives as long as the client's subscription to a room. It knows
//! whether this client is the host, remembers the last sequence number seen
//! (the cursor for resubscribing) and turns incoming events into corrections
//! for the local player.

use tracing::{debug, info};

use super::reconcile::{Correction, LocalPlayback, Reconciler};
use crate::chat::ChatView;
use crate::identity::UserId;
use crate::sync::{Envelope, HostReport, PlaybackSnapshot, PlaybackState, RoomEvent};

/// This client's part in the room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Source of truth while `generation` is current
    Host { generation: u64 },
    Guest,
}

#[derive(Debug)]
pub struct ClientSession {
    user_id: UserId,
    role: SessionRole,
    /// Newest host generation observed
    generation: u64,
    last_seq: Option<u64>,
    authoritative: Option<PlaybackState>,
    reconciler: Reconciler,
    chat: ChatView,
}

impl ClientSession {
    pub fn new(user_id: impl Into<UserId>, tolerance_secs: f64) -> Self {
        Self {
            user_id: user_id.into(),
            role: SessionRole::Guest,
            generation: 0,
            last_seq: None,
            authoritative: None,
            reconciler: Reconciler::new(tolerance_secs),
            chat: ChatView::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn is_host(&self) -> bool {
        matches!(self.role, SessionRole::Host { .. })
    }

    /// Cursor to resubscribe with after a reconnect
    pub fn last_seen_seq(&self) -> Option<u64> {
        self.last_seq
    }

    pub fn authoritative_state(&self) -> Option<&PlaybackState> {
        self.authoritative.as_ref()
    }

    pub fn chat(&self) -> &ChatView {
        &self.chat
    }

    pub fn chat_mut(&mut self) -> &mut ChatView {
        &mut self.chat
    }

    /// Initialize from the authoritative state fetched on join
    pub fn load_snapshot(&mut self, snapshot: &PlaybackSnapshot) {
        if snapshot.generation < self.generation {
            return;
        }
        self.observe_host(snapshot.host_id.as_deref(), snapshot.generation);
        self.authoritative = Some(snapshot.state.clone());
    }

    /// Correction against the latest known state, e.g. right after `load_snapshot`
    pub fn reconcile_now(&self, local: &LocalPlayback, now_ms: u64) -> Option<Correction> {
        if self.is_host() {
            return None;
        }
        let state = self.authoritative.as_ref()?;
        let correction = self.reconciler.reconcile(state, local, now_ms);
        (!correction.is_noop()).then_some(correction)
    }

    /// Process one delivered event. Returns what the local player should do, if anything.
    pub fn handle(&mut self, envelope: &Envelope, local: &LocalPlayback, now_ms: u64) -> Option<Correction> {
        if self.last_seq.is_some_and(|last| envelope.seq <= last) {
            debug!(seq = envelope.seq, "Skipping already seen event");
            return None;
        }
        self.last_seq = Some(envelope.seq);
        self.chat.apply(&envelope.event);

        match &envelope.event {
            RoomEvent::RoomState(snapshot) => {
                self.observe_host(snapshot.host_id.as_deref(), snapshot.host_generation);
                None
            }
            RoomEvent::SyncCorrection { state, generation, .. } => {
                if *generation < self.generation {
                    debug!(generation, current = self.generation, "Ignoring correction from old host");
                    return None;
                }
                self.observe_generation(*generation);
                self.authoritative = Some(state.clone());
                // The host never corrects against its own broadcasts
                self.reconcile_now(local, now_ms)
            }
            _ => None,
        }
    }

    /// Report for the synchronizer, only while this client is the host
    pub fn host_report(&self, local: &LocalPlayback, now_ms: u64) -> Option<HostReport> {
        let SessionRole::Host { generation } = self.role else {
            return None;
        };
        Some(HostReport {
            participant_id: self.user_id.clone(),
            generation,
            position_secs: local.position_secs,
            is_playing: local.is_playing,
            playback_rate: local.playback_rate,
            reported_at_ms: now_ms,
        })
    }

    fn observe_host(&mut self, host_id: Option<&str>, generation: u64) {
        if generation < self.generation {
            return;
        }
        self.generation = generation;
        if host_id == Some(self.user_id.as_str()) {
            if self.role != (SessionRole::Host { generation }) {
                info!(generation, "This client is now the host");
            }
            self.role = SessionRole::Host { generation };
        } else {
            self.observe_generation(generation);
        }
    }

    /// A host whose generation is no longer current becomes a guest
    fn observe_generation(&mut self, generation: u64) {
        self.generation = self.generation.max(generation);
        if let SessionRole::Host { generation: mine } = self.role {
            if mine != self.generation {
                info!(mine, current = self.generation, "Host role lost, reconciling as guest");
                self.role = SessionRole::Guest;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::{Room, RoomConfig, RoomId, RoomSnapshot};
    use crate::sync::SyncReason;

    fn state(position_secs: f64, is_playing: bool, updated_at_ms: u64) -> PlaybackState {
        PlaybackState {
            position_secs,
            is_playing,
            playback_rate: 1.0,
            updated_at_ms,
            source_participant_id: "alice".to_string(),
        }
    }

    fn correction(seq: u64, generation: u64, state: PlaybackState) -> Envelope {
        Envelope {
            seq,
            room_id: RoomId::parse("ABCD-EFGH").unwrap(),
            event: RoomEvent::SyncCorrection {
                state,
                generation,
                reason: SyncReason::Heartbeat,
            },
        }
    }

    fn room_state(seq: u64, host: &str, generation: u64) -> Envelope {
        let room_id = RoomId::parse("ABCD-EFGH").unwrap();
        let room = Room::from_config(room_id.clone(), &"alice".to_string(), RoomConfig::new("Film", "url", 4), 0);
        Envelope {
            seq,
            room_id,
            event: RoomEvent::RoomState(RoomSnapshot {
                room,
                participants: Vec::new(),
                host_id: Some(host.to_string()),
                host_generation: generation,
                playback: None,
            }),
        }
    }

    fn local(position_secs: f64, is_playing: bool) -> LocalPlayback {
        LocalPlayback {
            position_secs,
            is_playing,
            playback_rate: 1.0,
        }
    }

    #[test]
    fn test_guest_corrects_and_dedupes() {
        let mut session = ClientSession::new("bob", 2.0);
        let envelope = correction(1, 1, state(10.0, true, 1_000));

        let fix = session.handle(&envelope, &local(5.0, false), 4_000).unwrap();
        assert!((fix.seek_to.unwrap() - 13.0).abs() < 1e-9);
        assert_eq!(fix.set_playing, Some(true));
        assert_eq!(session.last_seen_seq(), Some(1));

        // Replayed envelope is ignored
        assert!(session.handle(&envelope, &local(5.0, false), 4_000).is_none());
    }

    #[test]
    fn test_host_never_self_corrects() {
        let mut session = ClientSession::new("alice", 2.0);
        session.handle(&room_state(1, "alice", 1), &local(0.0, false), 0);
        assert_eq!(session.role(), SessionRole::Host { generation: 1 });

        let far_off = correction(2, 1, state(500.0, true, 0));
        assert!(session.handle(&far_off, &local(0.0, false), 0).is_none());

        let report = session.host_report(&local(3.0, true), 10).unwrap();
        assert_eq!(report.generation, 1);
        assert_eq!(report.participant_id, "alice");
    }

    #[test]
    fn test_demoted_host_switches_to_guest() {
        let mut session = ClientSession::new("alice", 2.0);
        session.handle(&room_state(1, "alice", 1), &local(0.0, false), 0);

        // Bob took over at generation 2
        let fix = session.handle(&correction(2, 2, state(60.0, true, 0)), &local(10.0, true), 0);
        assert_eq!(session.role(), SessionRole::Guest);
        assert!(session.host_report(&local(10.0, true), 0).is_none());
        assert_eq!(fix.unwrap().seek_to, Some(60.0));
    }

    #[test]
    fn test_stale_generation_correction_ignored() {
        let mut session = ClientSession::new("carol", 2.0);
        session.handle(&room_state(1, "bob", 3), &local(0.0, false), 0);
        assert!(session
            .handle(&correction(2, 2, state(99.0, true, 0)), &local(0.0, false), 0)
            .is_none());
        assert!(session.authoritative_state().is_none());
    }

    #[test]
    fn test_snapshot_initializes_guest() {
        let mut session = ClientSession::new("bob", 2.0);
        session.load_snapshot(&PlaybackSnapshot {
            state: state(30.0, false, 0),
            generation: 1,
            host_id: Some("alice".to_string()),
        });
        let fix = session.reconcile_now(&local(0.0, false), 5_000).unwrap();
        assert_eq!(fix.seek_to, Some(30.0));
        assert_eq!(fix.set_playing, None);
    }
}
