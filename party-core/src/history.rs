//! Write-behind history for an external store
//!
//! Live behavior never depends on storage. Records are queued and handed to
//! the sink from a background task.

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::chat::{Message, MessageId};
use crate::identity::UserId;
use crate::room::{Participant, Room, RoomId};

/// A chat message flagged for moderator review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReport {
    pub room_id: RoomId,
    pub message_id: MessageId,
    pub reporter_id: UserId,
    pub reason: String,
    pub reported_at_ms: u64,
}

/// Something worth keeping after the session is over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum HistoryRecord {
    Room(Room),
    Participant(Participant),
    Message(Message),
    Report(MessageReport),
}

/// Destination for history records (database, log file, analytics)
pub trait HistorySink: Send + 'static {
    fn write(&mut self, record: HistoryRecord);
}

/// Queue in front of a [`HistorySink`]
#[derive(Debug, Clone)]
pub(crate) struct HistoryWriter {
    tx: mpsc::UnboundedSender<HistoryRecord>,
}

impl HistoryWriter {
    pub(crate) fn spawn(runtime: &Handle, mut sink: impl HistorySink) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        runtime.spawn(async move {
            while let Some(record) = rx.recv().await {
                sink.write(record);
            }
            debug!("History writer stopped");
        });
        Self { tx }
    }

    pub(crate) fn record(&self, record: HistoryRecord) {
        if self.tx.send(record).is_err() {
            warn!("History writer is gone, record dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ChannelSink(mpsc::UnboundedSender<HistoryRecord>);

    impl HistorySink for ChannelSink {
        fn write(&mut self, record: HistoryRecord) {
            let _ = self.0.send(record);
        }
    }

    #[tokio::test]
    async fn test_records_reach_sink_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let writer = HistoryWriter::spawn(&Handle::current(), ChannelSink(tx));

        let room_id = RoomId::random();
        for message_id in 1..=3 {
            writer.record(HistoryRecord::Report(MessageReport {
                room_id: room_id.clone(),
                message_id,
                reporter_id: "alice".to_string(),
                reason: "spoilers".to_string(),
                reported_at_ms: 0,
            }));
        }

        for expected in 1..=3 {
            match rx.recv().await {
                Some(HistoryRecord::Report(report)) => assert_eq!(report.message_id, expected),
                other => panic!("unexpected record {:?}", other),
            }
        }
    }

    #[test]
    fn test_record_tag() {
        let record = HistoryRecord::Report(MessageReport {
            room_id: RoomId::parse("ABCD-EFGH").unwrap(),
            message_id: 4,
            reporter_id: "bob".to_string(),
            reason: "spam".to_string(),
            reported_at_ms: 1,
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["record"], "report");
        assert_eq!(json["room_id"], "ABCDEFGH");
    }
}
