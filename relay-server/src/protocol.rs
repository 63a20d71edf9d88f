//! Messages exchanged with relay clients
//!
//! Every client frame is a [`ClientFrame`]: a `request_id` the reply will
//! echo plus one [`Request`] tagged by `op`. The first request on a
//! connection must be `hello`. Room events are pushed unprompted as
//! [`ServerMessage::Event`] until the feed stops, which is announced with
//! [`ServerMessage::Unsubscribed`].

use party_core::chat::{MessageId, ReactionDelta};
use party_core::room::{RoomConfig, RoomFilter, RoomId};
use party_core::{Envelope, HostReport, Identity, PartyError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub request_id: u64,
    #[serde(flatten)]
    pub request: Request,
}

/// One call into the hub. Room codes are accepted in any common spelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Hello {
        token: String,
    },
    CreateRoom {
        config: RoomConfig,
    },
    /// Start the room and subscribe this connection to its events as host
    StartRoom {
        room_id: String,
    },
    /// Join and subscribe this connection to the room's events
    JoinRoom {
        room_id: String,
        #[serde(default)]
        since: Option<u64>,
    },
    LeaveRoom {
        room_id: String,
    },
    EndRoom {
        room_id: String,
    },
    CancelRoom {
        room_id: String,
    },
    TransferHost {
        room_id: String,
        target_id: String,
    },
    SetCoHost {
        room_id: String,
        target_id: String,
        enabled: bool,
    },
    ListRooms {
        #[serde(default)]
        filter: RoomFilter,
    },
    Snapshot {
        room_id: String,
    },
    ReportPlayback {
        room_id: String,
        report: HostReport,
    },
    GetPlayback {
        room_id: String,
    },
    SendMessage {
        room_id: String,
        content: String,
        #[serde(default)]
        reply_to: Option<MessageId>,
        #[serde(default)]
        client_nonce: Option<String>,
    },
    SendReaction {
        room_id: String,
        emoji: String,
    },
    React {
        room_id: String,
        message_id: MessageId,
        emoji: String,
        delta: ReactionDelta,
    },
    CreatePoll {
        room_id: String,
        question: String,
        options: Vec<String>,
    },
    VotePoll {
        room_id: String,
        message_id: MessageId,
        option: usize,
    },
    PinMessage {
        room_id: String,
        message_id: MessageId,
        pinned: bool,
    },
    ReportMessage {
        room_id: String,
        message_id: MessageId,
        reason: String,
    },
}

impl Request {
    /// Short name for logs
    pub fn op(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "hello",
            Request::CreateRoom { .. } => "create_room",
            Request::StartRoom { .. } => "start_room",
            Request::JoinRoom { .. } => "join_room",
            Request::LeaveRoom { .. } => "leave_room",
            Request::EndRoom { .. } => "end_room",
            Request::CancelRoom { .. } => "cancel_room",
            Request::TransferHost { .. } => "transfer_host",
            Request::SetCoHost { .. } => "set_co_host",
            Request::ListRooms { .. } => "list_rooms",
            Request::Snapshot { .. } => "snapshot",
            Request::ReportPlayback { .. } => "report_playback",
            Request::GetPlayback { .. } => "get_playback",
            Request::SendMessage { .. } => "send_message",
            Request::SendReaction { .. } => "send_reaction",
            Request::React { .. } => "react",
            Request::CreatePoll { .. } => "create_poll",
            Request::VotePoll { .. } => "vote_poll",
            Request::PinMessage { .. } => "pin_message",
            Request::ReportMessage { .. } => "report_message",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to a successful `hello`
    Welcome { identity: Identity },
    Response {
        request_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    Event(Envelope),
    /// No more events will arrive for `room_id`, either because this client
    /// fell too far behind or because the room closed. Membership is kept;
    /// `join_room` with `since = last_seq` resumes the feed.
    Unsubscribed {
        room_id: RoomId,
        last_seq: Option<u64>,
    },
}

impl ServerMessage {
    pub fn reply(request_id: u64, outcome: Result<Value, ErrorBody>) -> Self {
        match outcome {
            Ok(result) => ServerMessage::Response {
                request_id,
                result: Some(result),
                error: None,
            },
            Err(error) => ServerMessage::Response {
                request_id,
                result: None,
                error: Some(error),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn unauthenticated() -> Self {
        Self::new("unauthenticated", "send hello with a valid token first")
    }
}

impl From<PartyError> for ErrorBody {
    fn from(e: PartyError) -> Self {
        let code = match &e {
            PartyError::Validation(_) => "validation",
            PartyError::NotFound(_) => "not_found",
            PartyError::InvalidState(_) => "invalid_state",
            PartyError::NotAuthorized(_) => "not_authorized",
            PartyError::RoomFull { .. } => "room_full",
        };
        Self::new(code, e.to_string())
    }
}

impl From<serde_json::Error> for ErrorBody {
    fn from(e: serde_json::Error) -> Self {
        Self::new("internal", e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_frame_shape() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "request_id": 3,
            "op": "join_room",
            "room_id": "abcd-efgh"
        }))
        .unwrap();
        assert_eq!(frame.request_id, 3);
        assert_eq!(
            frame.request,
            Request::JoinRoom {
                room_id: "abcd-efgh".to_string(),
                since: None
            }
        );
        assert_eq!(frame.request.op(), "join_room");
    }

    #[test]
    fn test_react_delta_is_snake_case() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "request_id": 9,
            "op": "react",
            "room_id": "ABCDEFGH",
            "message_id": 4,
            "emoji": "🎉",
            "delta": "remove"
        }))
        .unwrap();
        assert!(matches!(
            frame.request,
            Request::React { delta: ReactionDelta::Remove, message_id: 4, .. }
        ));
    }

    #[test]
    fn test_error_reply_omits_result() {
        let reply = ServerMessage::reply(
            5,
            Err(PartyError::RoomFull {
                room_id: "ABCDEFGH".to_string(),
                capacity: 2,
            }
            .into()),
        );
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["type"], "response");
        assert_eq!(value["request_id"], 5);
        assert_eq!(value["error"]["code"], "room_full");
        assert!(value.get("result").is_none());
    }
}
