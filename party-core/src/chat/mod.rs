//! Room chat: messages, reactions, polls and pins

mod log;
mod message;
mod view;

pub use log::ChatLog;
pub use message::{
    Message, MessageBody, MessageId, MessageKind, Poll, ReactionCounts, ReactionDelta,
    MAX_CONTENT_CHARS, MAX_POLL_OPTIONS,
};
pub use view::{ChatView, PendingMessage};
