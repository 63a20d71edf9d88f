//! Chat message model

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PartyError, Result};
use crate::identity::UserId;
use crate::room::RoomId;

/// Sequential per room, starting at 1
pub type MessageId = u64;

/// Longest accepted text message or poll question (characters)
pub const MAX_CONTENT_CHARS: usize = 2_000;

/// Most options a poll may carry
pub const MAX_POLL_OPTIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Reaction,
    System,
    Poll,
}

/// Kind-specific payload of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    Text { content: String },
    /// Floating reaction over the video
    Reaction { emoji: String },
    System { content: String },
    Poll(Poll),
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Text { .. } => MessageKind::Text,
            MessageBody::Reaction { .. } => MessageKind::Reaction,
            MessageBody::System { .. } => MessageKind::System,
            MessageBody::Poll(_) => MessageKind::Poll,
        }
    }

    /// Text to show in a transcript
    pub fn content(&self) -> &str {
        match self {
            MessageBody::Text { content } | MessageBody::System { content } => content,
            MessageBody::Reaction { emoji } => emoji,
            MessageBody::Poll(poll) => &poll.question,
        }
    }

    /// Reject empty or oversized user-supplied payloads
    pub fn validate(&self) -> Result<()> {
        match self {
            MessageBody::Text { content } | MessageBody::System { content } => {
                validate_text("message", content)
            }
            MessageBody::Reaction { emoji } => validate_emoji(emoji),
            MessageBody::Poll(poll) => poll.validate(),
        }
    }
}

/// A poll question with its running tally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub question: String,
    pub options: Vec<String>,
    /// One entry per option
    pub tallies: Vec<u32>,
}

impl Poll {
    pub fn new(question: impl Into<String>, options: Vec<String>) -> Result<Self> {
        let tallies = vec![0; options.len()];
        let poll = Self {
            question: question.into(),
            options,
            tallies,
        };
        poll.validate()?;
        Ok(poll)
    }

    fn validate(&self) -> Result<()> {
        validate_text("poll question", &self.question)?;
        if self.options.len() < 2 || self.options.len() > MAX_POLL_OPTIONS {
            return Err(PartyError::Validation(format!(
                "a poll needs between 2 and {} options",
                MAX_POLL_OPTIONS
            )));
        }
        for option in &self.options {
            validate_text("poll option", option)?;
        }
        if self.tallies.len() != self.options.len() {
            return Err(PartyError::Validation("poll tally does not match its options".to_string()));
        }
        Ok(())
    }

    pub fn total_votes(&self) -> u32 {
        self.tallies.iter().sum()
    }
}

/// Emoji → count. Counts never go negative and a zero count drops the key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReactionCounts(BTreeMap<String, u32>);

impl ReactionCounts {
    pub fn get(&self, emoji: &str) -> u32 {
        self.0.get(emoji).copied().unwrap_or(0)
    }

    /// Returns the new count; an unseen emoji starts at 1
    pub fn increment(&mut self, emoji: &str) -> u32 {
        let count = self.0.entry(emoji.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Returns the new count, saturating at 0
    pub fn decrement(&mut self, emoji: &str) -> u32 {
        let Some(count) = self.0.get_mut(emoji) else {
            return 0;
        };
        *count = count.saturating_sub(1);
        let remaining = *count;
        if remaining == 0 {
            self.0.remove(emoji);
        }
        remaining
    }

    /// Overwrite with an authoritative count
    pub fn set(&mut self, emoji: &str, count: u32) {
        if count == 0 {
            self.0.remove(emoji);
        } else {
            self.0.insert(emoji.to_string(), count);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(emoji, count)| (emoji.as_str(), *count))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Direction of a reaction toggle on an existing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionDelta {
    Add,
    Remove,
}

/// A chat, reaction, system or poll message in a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    /// Absent for system messages
    pub author_id: Option<UserId>,
    pub author_name: Option<String>,
    pub body: MessageBody,
    pub created_at_ms: u64,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
    #[serde(default)]
    pub reactions: ReactionCounts,
    #[serde(default)]
    pub pinned: bool,
    /// Echoed back so the sender can match its provisional copy
    #[serde(default)]
    pub client_nonce: Option<String>,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// Display order key: creation time, then id
    pub fn order_key(&self) -> (u64, MessageId) {
        (self.created_at_ms, self.id)
    }
}

fn validate_text(what: &str, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(PartyError::Validation(format!("{} must not be empty", what)));
    }
    if text.chars().count() > MAX_CONTENT_CHARS {
        return Err(PartyError::Validation(format!(
            "{} exceeds {} characters",
            what, MAX_CONTENT_CHARS
        )));
    }
    Ok(())
}

pub(crate) fn validate_emoji(emoji: &str) -> Result<()> {
    // A single grapheme can be several code points (skin tones, ZWJ sequences)
    if emoji.trim().is_empty() || emoji.chars().count() > 16 {
        return Err(PartyError::Validation("reaction must be a single emoji".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reaction_counts_start_at_one() {
        let mut counts = ReactionCounts::default();
        assert_eq!(counts.increment("🔥"), 1);
        assert_eq!(counts.increment("🔥"), 2);
        assert_eq!(counts.get("🔥"), 2);
        assert_eq!(counts.get("😂"), 0);
    }

    #[test]
    fn test_reaction_counts_never_negative() {
        let mut counts = ReactionCounts::default();
        assert_eq!(counts.decrement("👍"), 0);
        counts.increment("👍");
        assert_eq!(counts.decrement("👍"), 0);
        assert_eq!(counts.decrement("👍"), 0);
        assert!(counts.is_empty());
    }

    #[test]
    fn test_poll_needs_two_options() {
        assert!(Poll::new("Best scene?", vec!["Opening".to_string()]).is_err());
        assert!(Poll::new("Best scene?", vec!["Opening".to_string(), " ".to_string()]).is_err());

        let poll = Poll::new("Best scene?", vec!["Opening".to_string(), "Finale".to_string()]).unwrap();
        assert_eq!(poll.tallies, vec![0, 0]);
        assert_eq!(poll.total_votes(), 0);
    }

    #[test]
    fn test_empty_text_rejected() {
        let body = MessageBody::Text { content: "   ".to_string() };
        assert!(matches!(body.validate(), Err(PartyError::Validation(_))));

        let body = MessageBody::Text { content: "x".repeat(MAX_CONTENT_CHARS + 1) };
        assert!(body.validate().is_err());
    }

    #[test]
    fn test_body_wire_tag() {
        let body = MessageBody::Reaction { emoji: "🎉".to_string() };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["kind"], "reaction");
        assert_eq!(json["emoji"], "🎉");
    }
}
