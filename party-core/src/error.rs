//! Error types for room, playback and chat operations

use thiserror::Error;

/// Result type used throughout the core
pub type Result<T> = std::result::Result<T, PartyError>;

/// Errors surfaced to the immediate caller of a core operation.
///
/// None of these are retried by the core and none leave partial state behind.
/// Stale or out-of-order playback reports are not errors at all; they are
/// dropped and logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartyError {
    /// Malformed room configuration or message payload
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Referenced room, participant or message does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation is illegal for the current room lifecycle stage
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Actor lacks the host/moderator role the operation needs
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// Room already holds `capacity` present participants
    #[error("Room {room_id} is full ({capacity} participants)")]
    RoomFull { room_id: String, capacity: u32 },
}

impl PartyError {
    pub(crate) fn room_not_found(room_id: impl std::fmt::Display) -> Self {
        PartyError::NotFound(format!("room {}", room_id))
    }

    pub(crate) fn participant_not_found(user_id: &str) -> Self {
        PartyError::NotFound(format!("participant {}", user_id))
    }
}
