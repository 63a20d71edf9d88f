//! Playback Synchronizer
//!
//! Accepts host reports, keeps the authoritative state of each live room and
//! decides when guests need a correction. Two timers run per live room: the
//! heartbeat rebroadcasts the state while playing, and the watchdog hands the
//! host role on when the host goes quiet.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::protocol::{HostReport, PlaybackSnapshot, RoomEvent, SyncReason};
use super::state::ReportOutcome;
use crate::error::{PartyError, Result};
use crate::room::registry::RoomInner;
use crate::room::{RoomId, RoomManager, RoomStatus};
use crate::timer::TimerHandle;
use crate::HubInner;

/// Host report intake and authoritative state queries
#[derive(Clone)]
pub struct PlaybackSynchronizer {
    hub: Arc<HubInner>,
}

impl PlaybackSynchronizer {
    pub(crate) fn new(hub: Arc<HubInner>) -> Self {
        Self { hub }
    }

    /// Apply a report from the host's player.
    ///
    /// Stale, out-of-order and foreign reports come back as
    /// [`ReportOutcome::Dropped`] rather than as errors.
    pub fn report_host_state(&self, room_id: &RoomId, report: HostReport) -> Result<ReportOutcome> {
        let entry = self.hub.registry.get(room_id)?;
        let mut guard = entry.lock();
        let room = &mut *guard;
        if room.archived {
            return Err(PartyError::room_not_found(room_id));
        }
        room.ensure_status(RoomStatus::Live, "report playback for")?;
        let Some(track) = room.playback.as_mut() else {
            return Err(PartyError::InvalidState(format!("room {} has no playback", room_id)));
        };

        // Any report from the current host proves it is still there
        if track.host_id() == Some(report.participant_id.as_str()) && report.generation == track.generation() {
            room.last_host_contact = Instant::now();
        }

        let reporter = report.participant_id.clone();
        let outcome = track.accept(report, self.hub.config.seek_detection_secs);
        match outcome {
            ReportOutcome::Accepted { change: Some(reason) } => {
                debug!(room = %room_id, ?reason, position = track.state().position_secs, "Host playback changed");
                self.hub.publish(
                    room_id,
                    RoomEvent::SyncCorrection {
                        state: track.state().clone(),
                        generation: track.generation(),
                        reason,
                    },
                );
            }
            ReportOutcome::Accepted { change: None } => {}
            ReportOutcome::Dropped(reason) => {
                debug!(room = %room_id, participant = %reporter, ?reason, "Dropped host report");
            }
        }
        Ok(outcome)
    }

    /// Current authoritative state, for clients initializing their player
    pub fn get_authoritative_state(&self, room_id: &RoomId) -> Result<PlaybackSnapshot> {
        let entry = self.hub.registry.get(room_id)?;
        let room = entry.lock();
        if room.archived {
            return Err(PartyError::room_not_found(room_id));
        }
        room.ensure_status(RoomStatus::Live, "read playback of")?;
        room.playback
            .as_ref()
            .map(|track| track.snapshot())
            .ok_or_else(|| PartyError::InvalidState(format!("room {} has no playback", room_id)))
    }
}

/// Start heartbeat and watchdog for a room that has a host
pub(crate) fn start_playback_timers(hub: &Arc<HubInner>, room: &mut RoomInner) {
    let room_id = room.id().clone();
    room.last_host_contact = Instant::now();
    room.timers.heartbeat = Some(TimerHandle::spawn(
        &hub.runtime,
        "heartbeat",
        heartbeat(Arc::downgrade(hub), room_id.clone(), hub.config.heartbeat_interval()),
    ));
    room.timers.watchdog = Some(TimerHandle::spawn(
        &hub.runtime,
        "host watchdog",
        watch_host(Arc::downgrade(hub), room_id, hub.config.host_timeout()),
    ));
}

pub(crate) fn stop_playback_timers(room: &mut RoomInner) {
    if room.timers.heartbeat.take().is_some() | room.timers.watchdog.take().is_some() {
        debug!(room = %room.id(), "Playback timers stopped");
    }
}

/// Rebroadcast the authoritative state every `period` while playing
async fn heartbeat(hub: Weak<HubInner>, room_id: RoomId, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(hub) = hub.upgrade() else {
            return;
        };
        let Ok(entry) = hub.registry.get(&room_id) else {
            return;
        };
        let room = entry.lock();
        if room.archived || room.room.status != RoomStatus::Live {
            return;
        }
        if let Some(track) = room.playback.as_ref().filter(|track| track.state().is_playing) {
            hub.publish(
                &room_id,
                RoomEvent::SyncCorrection {
                    state: track.state().clone(),
                    generation: track.generation(),
                    reason: SyncReason::Heartbeat,
                },
            );
        }
    }
}

/// Treat the host as disconnected once no report arrived for `timeout`
async fn watch_host(hub: Weak<HubInner>, room_id: RoomId, timeout: Duration) {
    loop {
        let deadline = {
            let Some(hub) = hub.upgrade() else {
                return;
            };
            let Ok(entry) = hub.registry.get(&room_id) else {
                return;
            };
            let room = entry.lock();
            if room.archived || room.room.status != RoomStatus::Live || room.host_id().is_none() {
                return;
            }
            let deadline = room.last_host_contact + timeout;
            deadline
        };

        tokio::time::sleep_until(deadline).await;

        let Some(hub) = hub.upgrade() else {
            return;
        };
        debug!(room = %room_id, "Host watchdog deadline reached");
        RoomManager::new(hub).host_timed_out(&room_id);
    }
}
