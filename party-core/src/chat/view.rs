//! Client-side chat transcript with optimistic updates
//!
//! The sender shows its own messages and reactions immediately. Once the
//! broadcast comes back the provisional copy is replaced by the published one,
//! so nothing is counted twice.

use std::collections::HashMap;

use super::message::{Message, MessageBody, MessageId, ReactionDelta};
use crate::sync::RoomEvent;

/// A message shown before the room has confirmed it
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub nonce: String,
    pub body: MessageBody,
    pub created_at_ms: u64,
}

/// Ordered, de-duplicated view of a room's chat
#[derive(Debug, Default)]
pub struct ChatView {
    /// Sorted by (created_at, id)
    messages: Vec<Message>,
    pending: Vec<PendingMessage>,
    /// Unconfirmed local reaction deltas per (message, emoji)
    pending_reactions: HashMap<(MessageId, String), i64>,
}

impl ChatView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn pending(&self) -> &[PendingMessage] {
        &self.pending
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Show a message locally until the echo with the same nonce arrives
    pub fn add_provisional(&mut self, nonce: impl Into<String>, body: MessageBody, now_ms: u64) {
        self.pending.push(PendingMessage {
            nonce: nonce.into(),
            body,
            created_at_ms: now_ms,
        });
    }

    /// Show a reaction toggle locally until the authoritative count arrives
    pub fn react_provisional(&mut self, id: MessageId, emoji: &str, delta: ReactionDelta) {
        let step = match delta {
            ReactionDelta::Add => 1,
            ReactionDelta::Remove => -1,
        };
        *self.pending_reactions.entry((id, emoji.to_string())).or_insert(0) += step;
    }

    /// Confirmed count plus any local provisional delta, never below zero
    pub fn reaction_count(&self, id: MessageId, emoji: &str) -> u32 {
        let confirmed = self.get(id).map(|m| m.reactions.get(emoji)).unwrap_or(0) as i64;
        let provisional = self
            .pending_reactions
            .get(&(id, emoji.to_string()))
            .copied()
            .unwrap_or(0);
        (confirmed + provisional).max(0) as u32
    }

    /// Merge a published event. Replays and duplicates are harmless.
    pub fn apply(&mut self, event: &RoomEvent) {
        match event {
            RoomEvent::ChatMessage(message)
            | RoomEvent::SystemNotice(message)
            | RoomEvent::PollMessage(message) => self.insert(message.clone()),
            RoomEvent::ReactionUpdate { message_id, emoji, count } => {
                self.pending_reactions.remove(&(*message_id, emoji.clone()));
                if let Some(message) = self.get_mut(*message_id) {
                    message.reactions.set(emoji, *count);
                }
            }
            RoomEvent::PollUpdate { message_id, tallies } => {
                if let Some(message) = self.get_mut(*message_id) {
                    if let MessageBody::Poll(poll) = &mut message.body {
                        if poll.tallies.len() == tallies.len() {
                            poll.tallies.clone_from(tallies);
                        }
                    }
                }
            }
            RoomEvent::MessagePinned { message_id, pinned } => {
                if let Some(message) = self.get_mut(*message_id) {
                    message.pinned = *pinned;
                }
            }
            RoomEvent::SyncCorrection { .. } | RoomEvent::RoomState(_) => {}
        }
    }

    fn insert(&mut self, message: Message) {
        if let Some(nonce) = &message.client_nonce {
            self.pending.retain(|p| &p.nonce != nonce);
        }
        if let Some(existing) = self.get_mut(message.id) {
            *existing = message;
            return;
        }
        let key = message.order_key();
        let at = self.messages.partition_point(|m| m.order_key() < key);
        self.messages.insert(at, message);
    }

    fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ReactionCounts;
    use crate::room::RoomId;

    fn message(id: MessageId, created_at_ms: u64, nonce: Option<&str>) -> Message {
        Message {
            id,
            room_id: RoomId::parse("ABCD-EFGH").unwrap(),
            author_id: Some("alice".to_string()),
            author_name: Some("Alice".to_string()),
            body: MessageBody::Text { content: format!("message {}", id) },
            created_at_ms,
            reply_to: None,
            reactions: ReactionCounts::default(),
            pinned: false,
            client_nonce: nonce.map(str::to_string),
        }
    }

    #[test]
    fn test_display_order_is_time_then_id() {
        let mut view = ChatView::new();
        view.apply(&RoomEvent::ChatMessage(message(3, 200, None)));
        view.apply(&RoomEvent::ChatMessage(message(2, 100, None)));
        view.apply(&RoomEvent::ChatMessage(message(1, 100, None)));

        let ids: Vec<_> = view.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_replayed_message_not_duplicated() {
        let mut view = ChatView::new();
        let msg = message(1, 100, None);
        view.apply(&RoomEvent::ChatMessage(msg.clone()));
        view.apply(&RoomEvent::ChatMessage(msg));
        assert_eq!(view.messages().len(), 1);
    }

    #[test]
    fn test_echo_replaces_provisional() {
        let mut view = ChatView::new();
        view.add_provisional("n-1", MessageBody::Text { content: "hi".to_string() }, 90);
        assert_eq!(view.pending().len(), 1);

        view.apply(&RoomEvent::ChatMessage(message(1, 100, Some("n-1"))));
        assert!(view.pending().is_empty());
        assert_eq!(view.messages().len(), 1);
    }

    #[test]
    fn test_authoritative_count_supersedes_local_delta() {
        let mut view = ChatView::new();
        view.apply(&RoomEvent::ChatMessage(message(1, 100, None)));

        view.react_provisional(1, "🔥", ReactionDelta::Add);
        assert_eq!(view.reaction_count(1, "🔥"), 1);

        // Our own add plus someone else's: count 2, not 3
        view.apply(&RoomEvent::ReactionUpdate {
            message_id: 1,
            emoji: "🔥".to_string(),
            count: 2,
        });
        assert_eq!(view.reaction_count(1, "🔥"), 2);
    }

    #[test]
    fn test_provisional_remove_never_negative() {
        let mut view = ChatView::new();
        view.apply(&RoomEvent::ChatMessage(message(1, 100, None)));
        view.react_provisional(1, "👍", ReactionDelta::Remove);
        assert_eq!(view.reaction_count(1, "👍"), 0);
    }
}
