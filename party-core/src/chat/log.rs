//! Server-side chat state of one room

use std::collections::{BTreeMap, HashMap};

use super::message::{validate_emoji, Message, MessageBody, MessageId, ReactionDelta};
use crate::error::{PartyError, Result};
use crate::identity::UserId;
use crate::room::RoomId;

/// Every message of an open room plus poll ballots.
///
/// Messages are never removed while the room is open; the log goes away with
/// the room when it is archived.
#[derive(Debug)]
pub struct ChatLog {
    room_id: RoomId,
    next_id: MessageId,
    messages: BTreeMap<MessageId, Message>,
    /// Poll message → voter → chosen option
    ballots: HashMap<MessageId, HashMap<UserId, usize>>,
}

impl ChatLog {
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            next_id: 1,
            messages: BTreeMap::new(),
            ballots: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(&id)
    }

    /// Append a user message after validating its payload and reply target
    pub fn post(
        &mut self,
        author_id: &str,
        author_name: &str,
        body: MessageBody,
        reply_to: Option<MessageId>,
        client_nonce: Option<String>,
        now_ms: u64,
    ) -> Result<Message> {
        body.validate()?;
        if let Some(parent) = reply_to {
            if !self.messages.contains_key(&parent) {
                return Err(message_not_found(parent));
            }
        }

        let message = Message {
            id: self.allocate_id(),
            room_id: self.room_id.clone(),
            author_id: Some(author_id.to_string()),
            author_name: Some(author_name.to_string()),
            body,
            created_at_ms: now_ms,
            reply_to,
            reactions: Default::default(),
            pinned: false,
            client_nonce,
        };
        self.messages.insert(message.id, message.clone());
        Ok(message)
    }

    /// Append an authorless system message
    pub fn system(&mut self, content: impl Into<String>, now_ms: u64) -> Message {
        let message = Message {
            id: self.allocate_id(),
            room_id: self.room_id.clone(),
            author_id: None,
            author_name: None,
            body: MessageBody::System { content: content.into() },
            created_at_ms: now_ms,
            reply_to: None,
            reactions: Default::default(),
            pinned: false,
            client_nonce: None,
        };
        self.messages.insert(message.id, message.clone());
        message
    }

    /// Adjust a reaction counter. Returns the absolute count afterwards.
    pub fn react(&mut self, id: MessageId, emoji: &str, delta: ReactionDelta) -> Result<u32> {
        validate_emoji(emoji)?;
        let message = self.messages.get_mut(&id).ok_or_else(|| message_not_found(id))?;
        let count = match delta {
            ReactionDelta::Add => message.reactions.increment(emoji),
            ReactionDelta::Remove => message.reactions.decrement(emoji),
        };
        Ok(count)
    }

    /// Record `voter`'s choice, moving any earlier vote. Returns the full tally.
    pub fn vote(&mut self, id: MessageId, voter: &str, option: usize) -> Result<Vec<u32>> {
        let message = self.messages.get_mut(&id).ok_or_else(|| message_not_found(id))?;
        let MessageBody::Poll(poll) = &mut message.body else {
            return Err(PartyError::Validation(format!("message {} is not a poll", id)));
        };
        if option >= poll.options.len() {
            return Err(PartyError::Validation(format!(
                "poll {} has no option {}",
                id, option
            )));
        }

        let ballots = self.ballots.entry(id).or_default();
        if let Some(previous) = ballots.insert(voter.to_string(), option) {
            if let Some(tally) = poll.tallies.get_mut(previous) {
                *tally = tally.saturating_sub(1);
            }
        }
        poll.tallies[option] += 1;
        Ok(poll.tallies.clone())
    }

    pub fn set_pinned(&mut self, id: MessageId, pinned: bool) -> Result<()> {
        let message = self.messages.get_mut(&id).ok_or_else(|| message_not_found(id))?;
        message.pinned = pinned;
        Ok(())
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

fn message_not_found(id: MessageId) -> PartyError {
    PartyError::NotFound(format!("message {}", id))
}
