//! Room lifecycle, roster and host assignment

mod manager;
mod model;
pub(crate) mod registry;
mod room_id;

pub use manager::RoomManager;
pub use model::{Participant, Room, RoomConfig, RoomFilter, RoomSnapshot, RoomStatus, RoomSummary};
pub use room_id::RoomId;
