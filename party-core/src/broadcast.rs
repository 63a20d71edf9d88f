//! Per-room event fan-out with a bounded replay buffer
//!
//! Every room has a feed holding the next sequence number, the most recent
//! events and one bounded queue per subscribed participant. Publishing never
//! waits on a subscriber: a queue that is full gets dropped and its owner has
//! to resubscribe with its last seen sequence number.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{PartyError, Result};
use crate::identity::UserId;
use crate::room::RoomId;
use crate::sync::{Envelope, RoomEvent};

struct RoomFeed {
    next_seq: u64,
    /// Oldest first, at most `capacity` entries
    history: VecDeque<Envelope>,
    subscribers: HashMap<UserId, mpsc::Sender<Envelope>>,
}

impl RoomFeed {
    fn new() -> Self {
        Self {
            next_seq: 1,
            history: VecDeque::new(),
            subscribers: HashMap::new(),
        }
    }
}

/// Receiving end of a room subscription
#[derive(Debug)]
pub struct Subscription {
    pub room_id: RoomId,
    pub participant_id: UserId,
    /// The requested cursor had already rotated out of the buffer; some events were lost
    pub gap: bool,
    receiver: mpsc::Receiver<Envelope>,
}

impl Subscription {
    /// Next event in publish order, `None` once the feed dropped this subscriber
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Next already-delivered event without waiting
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }

    pub fn into_receiver(self) -> mpsc::Receiver<Envelope> {
        self.receiver
    }
}

/// Fan-out hub for every room of a process
pub struct EventChannel {
    feeds: RwLock<HashMap<RoomId, Arc<Mutex<RoomFeed>>>>,
    capacity: usize,
    replay_count: usize,
}

impl EventChannel {
    /// `capacity` bounds both the replay buffer and each subscriber queue
    pub fn new(capacity: usize, replay_count: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            feeds: RwLock::new(HashMap::new()),
            capacity,
            replay_count: replay_count.min(capacity),
        }
    }

    pub fn open_room(&self, room_id: &RoomId) {
        self.feeds
            .write()
            .entry(room_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(RoomFeed::new())));
    }

    /// Drop the feed; subscribers see their stream end after draining it
    pub fn close_room(&self, room_id: &RoomId) {
        if self.feeds.write().remove(room_id).is_some() {
            debug!(room = %room_id, "Event feed closed");
        }
    }

    /// Append to the room's history and hand to every subscriber. Returns the sequence number.
    pub fn publish(&self, room_id: &RoomId, event: RoomEvent) -> Result<u64> {
        let feed = self.feed(room_id)?;
        let mut feed = feed.lock();

        let seq = feed.next_seq;
        feed.next_seq += 1;
        let label = event.label();
        let envelope = Envelope {
            seq,
            room_id: room_id.clone(),
            event,
        };

        if feed.history.len() == self.capacity {
            feed.history.pop_front();
        }
        feed.history.push_back(envelope.clone());

        feed.subscribers.retain(|participant, sender| {
            match sender.try_send(envelope.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(room = %room_id, participant = %participant, "Subscriber queue full, dropping subscriber");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(room = %room_id, participant = %participant, "Subscriber went away");
                    false
                }
            }
        });

        debug!(room = %room_id, seq, event = label, "Published");
        Ok(seq)
    }

    /// Register `participant` as a sink, replacing any earlier sink of theirs.
    ///
    /// Without a cursor the last `replay_count` events are replayed. With a
    /// cursor still covered by the buffer, everything after it is replayed.
    /// A cursor that has rotated out gets the last `replay_count` events and
    /// `gap` set.
    pub fn subscribe(&self, room_id: &RoomId, participant: &str, since: Option<u64>) -> Result<Subscription> {
        let feed = self.feed(room_id)?;
        let mut feed = feed.lock();

        let (sender, receiver) = mpsc::channel(self.capacity);
        let mut gap = false;
        let skip = match since {
            None => feed.history.len().saturating_sub(self.replay_count),
            Some(cursor) => match feed.history.front() {
                Some(oldest) if cursor.saturating_add(1) >= oldest.seq => {
                    feed.history.iter().take_while(|e| e.seq <= cursor).count()
                }
                Some(_) => {
                    gap = true;
                    feed.history.len().saturating_sub(self.replay_count)
                }
                None => 0,
            },
        };

        // Replay fits: the queue is as large as the whole buffer
        for envelope in feed.history.iter().skip(skip) {
            if sender.try_send(envelope.clone()).is_err() {
                break;
            }
        }

        if feed.subscribers.insert(participant.to_string(), sender).is_some() {
            debug!(room = %room_id, participant = %participant, "Replaced existing subscription");
        }
        if gap {
            debug!(room = %room_id, participant = %participant, "Cursor rotated out of replay buffer");
        }

        Ok(Subscription {
            room_id: room_id.clone(),
            participant_id: participant.to_string(),
            gap,
            receiver,
        })
    }

    /// Remove the participant's sink. Room membership is untouched.
    pub fn unsubscribe(&self, room_id: &RoomId, participant: &str) -> bool {
        let Ok(feed) = self.feed(room_id) else {
            return false;
        };
        let removed = feed.lock().subscribers.remove(participant).is_some();
        removed
    }

    /// Buffered events, oldest first
    pub fn history(&self, room_id: &RoomId) -> Result<Vec<Envelope>> {
        let feed = self.feed(room_id)?;
        let history = feed.lock().history.iter().cloned().collect();
        Ok(history)
    }

    pub fn subscriber_count(&self, room_id: &RoomId) -> usize {
        self.feed(room_id)
            .map(|feed| feed.lock().subscribers.len())
            .unwrap_or(0)
    }

    /// Sequence number of the most recent event, 0 if none
    pub fn latest_seq(&self, room_id: &RoomId) -> Result<u64> {
        let feed = self.feed(room_id)?;
        let seq = feed.lock().next_seq - 1;
        Ok(seq)
    }

    fn feed(&self, room_id: &RoomId) -> Result<Arc<Mutex<RoomFeed>>> {
        self.feeds
            .read()
            .get(room_id)
            .cloned()
            .ok_or_else(|| PartyError::room_not_found(room_id))
    }
}
