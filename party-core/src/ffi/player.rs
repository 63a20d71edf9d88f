//! Player-side sync object for native apps

use std::sync::Once;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::types::*;
use crate::client::ClientSession;
use crate::current_time_ms;
use crate::sync::{Envelope, PlaybackSnapshot};

static TRACING_INIT: Once = Once::new();

/// Wraps a [`ClientSession`] for Swift/Kotlin players.
///
/// The app feeds it every event it receives as JSON plus its player's state,
/// and applies whatever correction comes back.
#[derive(uniffi::Object)]
pub struct PlayerSync {
    session: Mutex<ClientSession>,
}

#[uniffi::export]
impl PlayerSync {
    /// Create a sync object for `user_id`
    #[uniffi::constructor]
    pub fn new(user_id: String, drift_tolerance_secs: f64) -> Self {
        // Initialize tracing once
        TRACING_INIT.call_once(|| {
            let filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("party_core=info"));
            let _ = tracing_subscriber::fmt()
                .with_ansi(false) // Native consoles don't render colors
                .with_target(false)
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        });

        info!(user = %user_id, drift_tolerance_secs, "Player sync created");
        Self {
            session: Mutex::new(ClientSession::new(user_id, drift_tolerance_secs)),
        }
    }

    /// Seed from the authoritative state fetched on join
    pub fn load_snapshot_json(&self, json: String) -> Result<(), FfiError> {
        let snapshot: PlaybackSnapshot =
            serde_json::from_str(&json).map_err(|e| FfiError::MalformedSnapshot(e.to_string()))?;
        self.session.lock().load_snapshot(&snapshot);
        Ok(())
    }

    /// Correction to apply right now against the loaded state
    pub fn reconcile_now(&self, local: LocalPlaybackState) -> Option<SyncCorrection> {
        self.session
            .lock()
            .reconcile_now(&local.into(), current_time_ms())
            .map(SyncCorrection::from)
    }

    /// Process one event envelope
    pub fn handle_event_json(
        &self,
        json: String,
        local: LocalPlaybackState,
    ) -> Result<Option<SyncCorrection>, FfiError> {
        let envelope: Envelope =
            serde_json::from_str(&json).map_err(|e| FfiError::MalformedEvent(e.to_string()))?;
        let correction = self
            .session
            .lock()
            .handle(&envelope, &local.into(), current_time_ms());
        if let Some(c) = &correction {
            debug!(seq = envelope.seq, drift = c.drift_secs, "Correction for native player");
        }
        Ok(correction.map(SyncCorrection::from))
    }

    /// Report to send upstream, if this client is the host
    pub fn host_report(&self, local: LocalPlaybackState) -> Option<HostStateReport> {
        self.session
            .lock()
            .host_report(&local.into(), current_time_ms())
            .map(HostStateReport::from_report)
    }

    pub fn is_host(&self) -> bool {
        self.session.lock().is_host()
    }

    /// Cursor to resubscribe with after reconnecting
    pub fn last_seen_seq(&self) -> Option<u64> {
        self.session.lock().last_seen_seq()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(position_secs: f64) -> LocalPlaybackState {
        LocalPlaybackState {
            position_secs,
            is_playing: true,
            playback_rate: 1.0,
        }
    }

    #[test]
    fn test_malformed_event_rejected() {
        let sync = PlayerSync::new("bob".to_string(), 2.0);
        assert!(matches!(
            sync.handle_event_json("{not json".to_string(), local(0.0)),
            Err(FfiError::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_guest_gets_correction_from_json() {
        let sync = PlayerSync::new("bob".to_string(), 2.0);
        let json = r#"{
            "seq": 7,
            "room_id": "ABCDEFGH",
            "event": {
                "type": "sync_correction",
                "state": {
                    "position_secs": 120.0,
                    "is_playing": false,
                    "playback_rate": 1.0,
                    "updated_at_ms": 0,
                    "source_participant_id": "alice"
                },
                "generation": 1,
                "reason": "pause"
            }
        }"#;
        let correction = sync
            .handle_event_json(json.to_string(), local(10.0))
            .unwrap()
            .unwrap();
        assert_eq!(correction.seek_to_secs, Some(120.0));
        assert_eq!(correction.set_playing, Some(false));
        assert_eq!(sync.last_seen_seq(), Some(7));
        assert!(!sync.is_host());
        assert!(sync.host_report(local(0.0)).is_none());
    }
}
