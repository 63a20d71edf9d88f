//! Room Session Manager
//!
//! Owns room lifecycle, the participant roster and host assignment. Every
//! transition happens under the room's lock and is announced with a system
//! notice followed by the new room state, so all subscribers observe host
//! changes and lifecycle steps in the same order.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::registry::RoomInner;
use super::{Participant, Room, RoomConfig, RoomFilter, RoomId, RoomSnapshot, RoomStatus, RoomSummary};
use crate::broadcast::Subscription;
use crate::chat::{Message, MessageBody, MessageId, MessageKind, Poll, ReactionDelta};
use crate::error::{PartyError, Result};
use crate::history::{HistoryRecord, MessageReport};
use crate::identity::{Identity, Role};
use crate::sync::{start_playback_timers, stop_playback_timers, PlaybackTrack, RoomEvent, SyncReason};
use crate::timer::TimerHandle;
use crate::{current_time_ms, HubInner};

/// Attempts at drawing an unused room code
const MAX_CODE_ATTEMPTS: usize = 8;

/// How a participant went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Departure {
    Left,
    /// Host stopped reporting
    TimedOut,
}

/// Room lifecycle, roster and chat operations
#[derive(Clone)]
pub struct RoomManager {
    hub: Arc<HubInner>,
}

impl RoomManager {
    pub(crate) fn new(hub: Arc<HubInner>) -> Self {
        Self { hub }
    }

    /// Schedule a room. The creator becomes its designated host.
    pub fn create_room(&self, creator: &Identity, config: RoomConfig) -> Result<Room> {
        config.validate()?;
        let now = current_time_ms();

        for _ in 0..MAX_CODE_ATTEMPTS {
            let room = Room::from_config(RoomId::random(), &creator.user_id, config.clone(), now);
            let room_id = room.id.clone();
            if !self.hub.registry.insert(RoomInner::new(room.clone())) {
                debug!(room = %room_id, "Room code collision, drawing another");
                continue;
            }
            self.hub.channel.open_room(&room_id);
            info!(room = %room_id, creator = %creator.user_id, title = %room.title, "Room scheduled");
            self.hub.record(HistoryRecord::Room(room.clone()));

            self.with_room(&room_id, |inner| {
                announce(&self.hub, inner, format!("{} scheduled {}", creator.display_name, room.title));
                Ok(())
            })?;
            return Ok(room);
        }

        Err(PartyError::InvalidState("could not allocate a free room code".to_string()))
    }

    /// scheduled → live. The initiator joins if needed and becomes host at generation 1.
    pub fn start_room(&self, room_id: &RoomId, initiator: &Identity) -> Result<RoomSnapshot> {
        self.with_room(room_id, |room| {
            room.ensure_status(RoomStatus::Scheduled, "start")?;
            if room.room.created_by != initiator.user_id {
                return Err(PartyError::NotAuthorized(format!(
                    "only the designated host can start room {}",
                    room_id
                )));
            }

            let now = current_time_ms();
            if room.participant(&initiator.user_id).is_none() {
                admit(&self.hub, room, initiator, now)?;
            }

            room.room.status = RoomStatus::Live;
            room.room.started_at_ms = Some(now);
            room.playback = Some(PlaybackTrack::begin(initiator.user_id.clone(), now));
            mark_host(room, Some(initiator.user_id.as_str()));
            start_playback_timers(&self.hub, room);

            info!(room = %room_id, host = %initiator.user_id, "Room is live");
            self.hub.record(HistoryRecord::Room(room.room.clone()));
            announce(&self.hub, room, format!("{} started the watch party", initiator.display_name));
            publish_playback(&self.hub, room, SyncReason::Snapshot);
            Ok(room.snapshot())
        })
    }

    /// Add a participant. Joining again while present is a no-op.
    pub fn join_room(&self, room_id: &RoomId, identity: &Identity) -> Result<Participant> {
        self.with_room(room_id, |room| {
            room.ensure_open("join")?;
            if let Some(existing) = room.participant(&identity.user_id) {
                debug!(room = %room_id, user = %identity.user_id, "Already in room");
                return Ok(existing.clone());
            }

            admit(&self.hub, room, identity, current_time_ms())?;
            if room.timers.grace.take().is_some() {
                info!(room = %room_id, "Rejoin cancelled the grace period");
            }
            info!(room = %room_id, user = %identity.user_id, "Participant joined");

            if room.room.status == RoomStatus::Live && room.host_id().is_none() {
                let generation = hand_off(&self.hub, room, Some(identity.user_id.as_str()));
                info!(room = %room_id, host = %identity.user_id, generation, "Joiner took over the empty room");
                announce(&self.hub, room, format!("{} joined and is now the host", identity.display_name));
                publish_playback(&self.hub, room, SyncReason::HostChanged);
            } else {
                announce(&self.hub, room, format!("{} joined", identity.display_name));
            }

            room.participant(&identity.user_id)
                .cloned()
                .ok_or_else(|| PartyError::participant_not_found(&identity.user_id))
        })
    }

    /// Mark the participant as gone, handing off the host role if they held it
    pub fn leave_room(&self, room_id: &RoomId, user_id: &str) -> Result<()> {
        let archive = self.with_room(room_id, |room| depart(&self.hub, room, user_id, Departure::Left))?;
        if archive {
            self.archive(room_id);
        }
        Ok(())
    }

    /// live → ended, by the host or a moderator
    pub fn end_room(&self, room_id: &RoomId, actor: &Identity) -> Result<()> {
        let archive = self.with_room(room_id, |room| {
            room.ensure_status(RoomStatus::Live, "end")?;
            if !room.is_host(&actor.user_id) && !actor.can_moderate() {
                return Err(PartyError::NotAuthorized(format!(
                    "only the host or a moderator can end room {}",
                    room_id
                )));
            }
            finish(&self.hub, room, RoomStatus::Ended, format!("{} ended the watch party", actor.display_name));
            Ok(room.present_count() == 0)
        })?;
        if archive {
            self.archive(room_id);
        }
        Ok(())
    }

    /// scheduled/live → cancelled, by the designated host, the current host or a moderator
    pub fn cancel_room(&self, room_id: &RoomId, actor: &Identity) -> Result<()> {
        let archive = self.with_room(room_id, |room| {
            if !room.room.status.can_transition_to(RoomStatus::Cancelled) {
                return Err(PartyError::InvalidState(format!(
                    "cannot cancel room {} after it {}",
                    room_id, room.room.status
                )));
            }
            let allowed = room.room.created_by == actor.user_id
                || room.is_host(&actor.user_id)
                || actor.can_moderate();
            if !allowed {
                return Err(PartyError::NotAuthorized(format!(
                    "{} may not cancel room {}",
                    actor.user_id, room_id
                )));
            }
            finish(
                &self.hub,
                room,
                RoomStatus::Cancelled,
                format!("{} cancelled the watch party", actor.display_name),
            );
            Ok(room.present_count() == 0)
        })?;
        if archive {
            self.archive(room_id);
        }
        Ok(())
    }

    /// The current host hands the role to another present participant.
    ///
    /// Returns the new host generation.
    pub fn transfer_host(&self, room_id: &RoomId, actor_id: &str, target_id: &str) -> Result<u64> {
        self.with_room(room_id, |room| {
            room.ensure_status(RoomStatus::Live, "transfer host in")?;
            if !room.is_host(actor_id) {
                return Err(PartyError::NotAuthorized(
                    "only the host can hand over the host role".to_string(),
                ));
            }
            let target_name = room
                .participant(target_id)
                .map(|p| p.display_name.clone())
                .ok_or_else(|| PartyError::participant_not_found(target_id))?;
            if target_id == actor_id {
                return Ok(room.generation());
            }

            let generation = hand_off(&self.hub, room, Some(target_id));
            info!(room = %room_id, from = %actor_id, to = %target_id, generation, "Host transferred");
            announce(&self.hub, room, format!("{} is now the host", target_name));
            publish_playback(&self.hub, room, SyncReason::HostChanged);
            Ok(generation)
        })
    }

    /// Grant or revoke co-host. Host only (designated host before the room is live).
    pub fn set_co_host(&self, room_id: &RoomId, actor_id: &str, target_id: &str, enabled: bool) -> Result<()> {
        self.with_room(room_id, |room| {
            room.ensure_open("change co-hosts")?;
            let allowed = room.is_host(actor_id)
                || (room.room.status == RoomStatus::Scheduled && room.room.created_by == actor_id);
            if !allowed {
                return Err(PartyError::NotAuthorized("only the host can appoint co-hosts".to_string()));
            }

            let participant = room
                .participant_mut(target_id)
                .ok_or_else(|| PartyError::participant_not_found(target_id))?;
            if participant.is_co_host == enabled {
                return Ok(());
            }
            participant.is_co_host = enabled;
            let notice = if enabled {
                format!("{} is now a co-host", participant.display_name)
            } else {
                format!("{} is no longer a co-host", participant.display_name)
            };
            announce(&self.hub, room, notice);
            Ok(())
        })
    }

    /// Public rooms matching `filter`, by scheduled time then id
    pub fn list_rooms(&self, filter: &RoomFilter) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .hub
            .registry
            .entries()
            .into_iter()
            .filter_map(|entry| {
                let room = entry.lock();
                if room.archived || !filter.matches(&room.room) {
                    return None;
                }
                Some(RoomSummary {
                    room: room.room.clone(),
                    participant_count: room.present_count() as u32,
                })
            })
            .collect();
        rooms.sort_by(|a, b| {
            (a.room.scheduled_at_ms, &a.room.id).cmp(&(b.room.scheduled_at_ms, &b.room.id))
        });
        rooms
    }

    pub fn snapshot(&self, room_id: &RoomId) -> Result<RoomSnapshot> {
        self.with_room(room_id, |room| Ok(room.snapshot()))
    }

    /// Subscribe a present participant to the room's events
    pub fn subscribe(&self, room_id: &RoomId, user_id: &str, since: Option<u64>) -> Result<Subscription> {
        self.with_room(room_id, |room| {
            room.require_participant(user_id)?;
            self.hub.channel.subscribe(room_id, user_id, since)
        })
    }

    pub fn unsubscribe(&self, room_id: &RoomId, user_id: &str) -> bool {
        self.hub.channel.unsubscribe(room_id, user_id)
    }

    pub fn send_message(
        &self,
        room_id: &RoomId,
        user_id: &str,
        content: impl Into<String>,
        reply_to: Option<MessageId>,
        client_nonce: Option<String>,
    ) -> Result<Message> {
        let body = MessageBody::Text { content: content.into() };
        self.post(room_id, user_id, body, reply_to, client_nonce)
    }

    /// Floating reaction over the video
    pub fn send_reaction(&self, room_id: &RoomId, user_id: &str, emoji: impl Into<String>) -> Result<Message> {
        let body = MessageBody::Reaction { emoji: emoji.into() };
        self.post(room_id, user_id, body, None, None)
    }

    /// Add or remove an emoji on an existing message. Returns the new count.
    pub fn react(
        &self,
        room_id: &RoomId,
        user_id: &str,
        message_id: MessageId,
        emoji: &str,
        delta: ReactionDelta,
    ) -> Result<u32> {
        self.with_room(room_id, |room| {
            room.ensure_open("react")?;
            room.require_participant(user_id)?;
            let count = room.chat.react(message_id, emoji, delta)?;
            self.hub.publish(
                room_id,
                RoomEvent::ReactionUpdate {
                    message_id,
                    emoji: emoji.to_string(),
                    count,
                },
            );
            Ok(count)
        })
    }

    pub fn create_poll(
        &self,
        room_id: &RoomId,
        user_id: &str,
        question: impl Into<String>,
        options: Vec<String>,
    ) -> Result<Message> {
        let poll = Poll::new(question, options)?;
        self.post(room_id, user_id, MessageBody::Poll(poll), None, None)
    }

    /// One vote per participant; voting again moves it. Returns the tally.
    pub fn vote_poll(&self, room_id: &RoomId, user_id: &str, message_id: MessageId, option: usize) -> Result<Vec<u32>> {
        self.with_room(room_id, |room| {
            room.ensure_open("vote")?;
            room.require_participant(user_id)?;
            let tallies = room.chat.vote(message_id, user_id, option)?;
            self.hub.publish(
                room_id,
                RoomEvent::PollUpdate {
                    message_id,
                    tallies: tallies.clone(),
                },
            );
            Ok(tallies)
        })
    }

    /// Host, co-hosts and moderators may pin
    pub fn pin_message(&self, room_id: &RoomId, actor_id: &str, message_id: MessageId, pinned: bool) -> Result<()> {
        self.with_room(room_id, |room| {
            room.ensure_open("pin messages")?;
            let actor = room.require_participant(actor_id)?;
            let allowed = actor.is_host
                || actor.is_co_host
                || actor.role != Role::User
                || room.room.created_by == actor_id;
            if !allowed {
                return Err(PartyError::NotAuthorized(
                    "only the host, co-hosts and moderators can pin messages".to_string(),
                ));
            }
            room.chat.set_pinned(message_id, pinned)?;
            self.hub.publish(room_id, RoomEvent::MessagePinned { message_id, pinned });
            Ok(())
        })
    }

    /// Hand a message to the moderation flow. Nothing is broadcast.
    pub fn report_message(
        &self,
        room_id: &RoomId,
        reporter_id: &str,
        message_id: MessageId,
        reason: impl Into<String>,
    ) -> Result<()> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(PartyError::Validation("report reason must not be empty".to_string()));
        }
        self.with_room(room_id, |room| {
            room.require_participant(reporter_id)?;
            if room.chat.get(message_id).is_none() {
                return Err(PartyError::NotFound(format!("message {}", message_id)));
            }
            info!(room = %room_id, reporter = %reporter_id, message_id, "Message reported");
            self.hub.record(HistoryRecord::Report(MessageReport {
                room_id: room_id.clone(),
                message_id,
                reporter_id: reporter_id.to_string(),
                reason,
                reported_at_ms: current_time_ms(),
            }));
            Ok(())
        })
    }

    /// Watchdog expiry: treat a silent host as having left
    pub(crate) fn host_timed_out(&self, room_id: &RoomId) {
        let timeout = self.hub.config.host_timeout();
        let result = self.with_room(room_id, |room| {
            if room.room.status != RoomStatus::Live {
                return Ok(false);
            }
            let Some(host_id) = room.host_id().map(str::to_string) else {
                return Ok(false);
            };
            if room.last_host_contact.elapsed() < timeout {
                return Ok(false);
            }
            warn!(
                room = %room_id,
                host = %host_id,
                timeout_ms = self.hub.config.host_timeout_ms,
                "No report from host, treating as disconnected"
            );
            depart(&self.hub, room, &host_id, Departure::TimedOut)
        });
        match result {
            Ok(true) => self.archive(room_id),
            Ok(false) => {}
            Err(e) => debug!(room = %room_id, "Host timeout check skipped: {}", e),
        }
    }

    /// Grace timer expiry: end a live room nobody came back to
    pub(crate) fn grace_expired(&self, room_id: &RoomId) {
        let result = self.with_room(room_id, |room| {
            if room.room.status != RoomStatus::Live || room.present_count() > 0 {
                return Ok(false);
            }
            info!(room = %room_id, "Grace period over, ending room");
            finish(
                &self.hub,
                room,
                RoomStatus::Ended,
                "Everyone left, the watch party has ended".to_string(),
            );
            Ok(true)
        });
        if let Ok(true) = result {
            self.archive(room_id);
        }
    }

    fn post(
        &self,
        room_id: &RoomId,
        user_id: &str,
        body: MessageBody,
        reply_to: Option<MessageId>,
        client_nonce: Option<String>,
    ) -> Result<Message> {
        self.with_room(room_id, |room| {
            room.ensure_open("chat")?;
            let author_name = room.require_participant(user_id)?.display_name.clone();
            let message = room
                .chat
                .post(user_id, &author_name, body, reply_to, client_nonce, current_time_ms())?;
            self.hub.record(HistoryRecord::Message(message.clone()));
            let event = match message.kind() {
                MessageKind::Poll => RoomEvent::PollMessage(message.clone()),
                _ => RoomEvent::ChatMessage(message.clone()),
            };
            self.hub.publish(room_id, event);
            Ok(message)
        })
    }

    /// Run `f` under the room lock
    fn with_room<T>(&self, room_id: &RoomId, f: impl FnOnce(&mut RoomInner) -> Result<T>) -> Result<T> {
        let entry = self.hub.registry.get(room_id)?;
        let mut room = entry.lock();
        if room.archived {
            return Err(PartyError::room_not_found(room_id));
        }
        f(&mut *room)
    }

    /// Drop a closed, empty room from the registry and close its feed
    fn archive(&self, room_id: &RoomId) {
        if let Some(entry) = self.hub.registry.remove(room_id) {
            let mut room = entry.lock();
            room.archived = true;
            room.timers.cancel_all();
        }
        self.hub.channel.close_room(room_id);
        info!(room = %room_id, "Room archived");
    }
}

/// Add a participant record if there is room for one
fn admit(hub: &HubInner, room: &mut RoomInner, identity: &Identity, now_ms: u64) -> Result<()> {
    let capacity = room.room.max_participants;
    if room.present_count() >= capacity as usize {
        return Err(PartyError::RoomFull {
            room_id: room.id().to_string(),
            capacity,
        });
    }
    let participant = Participant::new(room.id().clone(), identity, now_ms);
    hub.record(HistoryRecord::Participant(participant.clone()));
    room.participants.push(participant);
    Ok(())
}

/// Mark `user_id` as gone and repair host assignment.
///
/// Returns whether the room is closed and empty, i.e. ready to archive.
pub(crate) fn depart(
    hub: &Arc<HubInner>,
    room: &mut RoomInner,
    user_id: &str,
    departure: Departure,
) -> Result<bool> {
    let was_host = room.is_host(user_id);
    let index = room
        .participants
        .iter()
        .position(|p| p.user_id == user_id)
        .ok_or_else(|| PartyError::participant_not_found(user_id))?;
    // The finished stay lives on only in history
    let mut departed = room.participants.remove(index);
    departed.left_at_ms = Some(current_time_ms());
    departed.is_host = false;
    hub.record(HistoryRecord::Participant(departed.clone()));

    info!(room = %departed.room_id, user = %user_id, ?departure, "Participant left");
    let notice = match departure {
        Departure::Left => format!("{} left", departed.display_name),
        Departure::TimedOut => format!("{} lost connection", departed.display_name),
    };
    announce(hub, room, notice);

    if room.room.status == RoomStatus::Live {
        if was_host {
            let successor = room
                .longest_tenured()
                .map(|p| (p.user_id.clone(), p.display_name.clone()));
            match successor {
                Some((next_id, next_name)) => {
                    let generation = hand_off(hub, room, Some(next_id.as_str()));
                    info!(room = %departed.room_id, host = %next_id, generation, "Host handed off");
                    announce(hub, room, format!("{} is now the host", next_name));
                    publish_playback(hub, room, SyncReason::HostChanged);
                }
                None => {
                    hand_off(hub, room, None);
                }
            }
        }
        if room.present_count() == 0 {
            stop_playback_timers(room);
            start_grace(hub, room);
            info!(
                room = %departed.room_id,
                grace_ms = hub.config.grace_period_ms,
                "Room is empty, grace period started"
            );
        }
    }

    Ok(!room.room.status.is_open() && room.present_count() == 0)
}

/// Move host authority, bumping the generation. Returns the new generation.
fn hand_off(hub: &Arc<HubInner>, room: &mut RoomInner, new_host: Option<&str>) -> u64 {
    mark_host(room, new_host);
    let generation = match room.playback.as_mut() {
        Some(track) => track.hand_off(new_host.map(str::to_string)),
        None => return 0,
    };
    if new_host.is_some() {
        room.last_host_contact = Instant::now();
        if room.timers.heartbeat.is_none() {
            start_playback_timers(hub, room);
        }
    } else {
        stop_playback_timers(room);
    }
    generation
}

fn mark_host(room: &mut RoomInner, host: Option<&str>) {
    for participant in room.participants.iter_mut() {
        participant.is_host = Some(participant.user_id.as_str()) == host;
    }
}

/// Close the room for good: stop timers, drop playback, announce
fn finish(hub: &HubInner, room: &mut RoomInner, status: RoomStatus, notice: String) {
    room.room.status = status;
    room.room.ended_at_ms = Some(current_time_ms());
    room.playback = None;
    room.timers.cancel_all();
    for participant in room.participants.iter_mut() {
        participant.is_host = false;
    }
    info!(room = %room.room.id, %status, "Room closed");
    hub.record(HistoryRecord::Room(room.room.clone()));
    announce(hub, room, notice);
}

fn start_grace(hub: &Arc<HubInner>, room: &mut RoomInner) {
    let weak = Arc::downgrade(hub);
    let room_id = room.id().clone();
    let period = hub.config.grace_period();
    let task = async move {
        tokio::time::sleep(period).await;
        if let Some(hub) = weak.upgrade() {
            RoomManager::new(hub).grace_expired(&room_id);
        }
    };
    room.timers.grace = Some(TimerHandle::spawn(&hub.runtime, "grace", task));
}

/// System notice plus the resulting room state
fn announce(hub: &HubInner, room: &mut RoomInner, text: impl Into<String>) {
    let notice = room.chat.system(text, current_time_ms());
    hub.record(HistoryRecord::Message(notice.clone()));
    hub.publish(&room.room.id, RoomEvent::SystemNotice(notice));
    hub.publish(&room.room.id, RoomEvent::RoomState(room.snapshot()));
}

fn publish_playback(hub: &HubInner, room: &RoomInner, reason: SyncReason) {
    if let Some(track) = &room.playback {
        hub.publish(
            &room.room.id,
            RoomEvent::SyncCorrection {
                state: track.state().clone(),
                generation: track.generation(),
                reason,
            },
        );
    }
}
