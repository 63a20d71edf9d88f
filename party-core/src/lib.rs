//! Watch Party - Core Library
//!
//! This library keeps the video players of everyone in a watch-party room
//! aligned with the host's, and carries the room's chat, reactions and polls
//! alongside the playback stream.

pub mod broadcast;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod ffi;
pub mod history;
pub mod identity;
pub mod room;
pub mod sync;
mod timer;

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{info, warn};

// Re-exports for convenience
pub use broadcast::{EventChannel, Subscription};
pub use client::{ClientSession, Correction, LocalPlayback, Player, Reconciler};
pub use config::SyncConfig;
pub use error::{PartyError, Result};
pub use history::{HistoryRecord, HistorySink, MessageReport};
pub use identity::{Identity, IdentityProvider, Role, UserId};
pub use room::{RoomId, RoomManager};
pub use sync::{Envelope, HostReport, PlaybackSynchronizer, PlaybackState, RoomEvent};

use history::HistoryWriter;
use room::registry::RoomRegistry;

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();

/// Shared state behind every handle of a hub
pub(crate) struct HubInner {
    pub(crate) config: SyncConfig,
    pub(crate) registry: RoomRegistry,
    pub(crate) channel: EventChannel,
    pub(crate) history: Option<HistoryWriter>,
    /// Runtime the room timers are spawned on
    pub(crate) runtime: Handle,
}

impl HubInner {
    /// Publish to a room, logging instead of failing if its feed is gone
    pub(crate) fn publish(&self, room_id: &RoomId, event: RoomEvent) {
        if let Err(e) = self.channel.publish(room_id, event) {
            warn!(room = %room_id, "Failed to publish event: {}", e);
        }
    }

    pub(crate) fn record(&self, record: HistoryRecord) {
        if let Some(history) = &self.history {
            history.record(record);
        }
    }
}

/// Entry point: one hub serves any number of independent rooms.
///
/// Cheap to clone; all clones share the same rooms.
#[derive(Clone)]
pub struct PartyHub {
    inner: Arc<HubInner>,
}

impl PartyHub {
    /// Create a hub on the current tokio runtime
    pub fn new(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let runtime = current_runtime()?;
        Ok(Self::assemble(config, runtime, None))
    }

    /// Create a hub that also writes room history to `sink`
    pub fn with_history(config: SyncConfig, sink: impl HistorySink) -> Result<Self> {
        config.validate()?;
        let runtime = current_runtime()?;
        let writer = HistoryWriter::spawn(&runtime, sink);
        Ok(Self::assemble(config, runtime, Some(writer)))
    }

    fn assemble(config: SyncConfig, runtime: Handle, history: Option<HistoryWriter>) -> Self {
        info!(
            drift_tolerance_secs = config.drift_tolerance_secs,
            heartbeat_ms = config.heartbeat_interval_ms,
            host_timeout_ms = config.host_timeout_ms,
            grace_ms = config.grace_period_ms,
            "Party hub ready"
        );
        let channel = EventChannel::new(config.history_capacity, config.replay_count);
        Self {
            inner: Arc::new(HubInner {
                config,
                registry: RoomRegistry::new(),
                channel,
                history,
                runtime,
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Room lifecycle, roster and chat
    pub fn rooms(&self) -> RoomManager {
        RoomManager::new(self.inner.clone())
    }

    /// Host reports and authoritative playback state
    pub fn playback(&self) -> PlaybackSynchronizer {
        PlaybackSynchronizer::new(self.inner.clone())
    }

    /// Raw event feeds
    pub fn events(&self) -> &EventChannel {
        &self.inner.channel
    }

    /// Rooms currently held in memory
    pub fn room_count(&self) -> usize {
        self.inner.registry.len()
    }
}

fn current_runtime() -> Result<Handle> {
    Handle::try_current()
        .map_err(|_| PartyError::InvalidState("party hub needs a running tokio runtime".to_string()))
}

/// Get current time in milliseconds since UNIX epoch
pub fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
