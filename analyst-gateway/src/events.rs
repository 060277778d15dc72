//! WebSocket wire format.
//!
//! Every frame is a JSON object `{"type": ..., "payload": ...}`. The only
//! exceptions are auth rejections (`{"type":"error","message":...}`) and
//! structured model replies, which are forwarded as the model produced them.

use analyst_store::{PeerMessage, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound frame before its payload is interpreted.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Decode the payload, treating a missing payload as an empty object.
    pub fn payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        match &self.payload {
            Value::Null => serde_json::from_value(Value::Object(Default::default())),
            payload => T::deserialize(payload),
        }
    }
}

// ============================================================================
// Agent channel
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartSessionPayload {
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserMessagePayload {
    pub session_id: i64,
    pub text: String,
}

// ============================================================================
// Peer channel
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PrivateMessagePayload {
    pub receiver_id: UserId,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetHistoryPayload {
    pub other_user_id: UserId,
}

// ============================================================================
// Outbound
// ============================================================================

/// Events the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    SessionStarted {
        session_id: i64,
    },
    Error {
        msg: String,
    },
    AiDone {
        text: String,
    },
    DocGenerated {
        draft_id: i64,
        file_path: String,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    DocumentCreated {
        draft_id: i64,
        session_id: i64,
        title: String,
    },
    NewMessage(PeerMessage),
    MessageSent(PeerMessage),
    History {
        other_user_id: UserId,
        messages: Vec<PeerMessage>,
    },
}

impl ServerEvent {
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error { msg: msg.into() }
    }

    /// `doc_generated` for a stored draft.
    pub fn doc_generated(draft_id: i64, file_path: impl Into<String>, title: Option<String>) -> Self {
        Self::DocGenerated {
            draft_id,
            file_path: file_path.into(),
            url: download_url(draft_id),
            title,
        }
    }
}

/// Download route for a draft document.
pub fn download_url(draft_id: i64) -> String {
    format!("/drafts/{draft_id}/download")
}

/// What the writer task serializes onto the socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Event(ServerEvent),
    /// Sent as-is, e.g. a structured model reply.
    Raw(Value),
}

impl OutboundFrame {
    /// Terminal auth failure, `{"type":"error","message":...}`.
    pub fn auth_error(message: &str) -> Self {
        Self::Raw(serde_json::json!({ "type": "error", "message": message }))
    }
}

impl From<ServerEvent> for OutboundFrame {
    fn from(event: ServerEvent) -> Self {
        Self::Event(event)
    }
}
