//! Playback synchronization between the host and guests

mod protocol;
mod state;
mod synchronizer;

pub use protocol::*;
pub use state::{DropReason, PlaybackTrack, ReportOutcome};
pub use synchronizer::PlaybackSynchronizer;

pub(crate) use synchronizer::{start_playback_timers, stop_playback_timers};
