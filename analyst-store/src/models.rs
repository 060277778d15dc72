//! Row types shared by the stores and the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Numeric user identifier. `0` marks an unknown owner.
pub type UserId = i64;

/// Owner id recorded when a connection carried no usable identity.
pub const ANONYMOUS_USER: UserId = 0;

/// A stored string did not match any known variant.
#[derive(Debug, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(ParseEnumError {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

// ============================================================================
// Sessions
// ============================================================================

/// Review state of a chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Reviewing,
    Accepted,
    Rejected,
}

string_enum!(SessionStatus, "session status", {
    Reviewing => "reviewing",
    Accepted => "accepted",
    Rejected => "rejected",
});

/// A conversation between one user and the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub owner_user_id: UserId,
    pub title: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Messages
// ============================================================================

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Ai,
}

string_enum!(Author, "author", {
    User => "user",
    Ai => "ai",
});

/// One immutable turn of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub session_id: i64,
    pub author: Author,
    /// Free text, or a serialized structured reply. Never interpreted here.
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for [`Message`].
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: i64,
    pub author: Author,
    pub text: String,
}

impl NewMessage {
    pub fn user(session_id: i64, text: impl Into<String>) -> Self {
        Self {
            session_id,
            author: Author::User,
            text: text.into(),
        }
    }

    pub fn ai(session_id: i64, text: impl Into<String>) -> Self {
        Self {
            session_id,
            author: Author::Ai,
            text: text.into(),
        }
    }
}

// ============================================================================
// Drafts
// ============================================================================

/// Approval state of a generated document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    Pending,
    Approved,
    Rejected,
}

string_enum!(DraftStatus, "draft status", {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

/// A generated document and the structured data it was rendered from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: i64,
    /// `None` for drafts created outside a chat session.
    pub session_id: Option<i64>,
    pub owner_user_id: UserId,
    pub title: String,
    /// Human-readable summary.
    pub content: String,
    pub status: DraftStatus,
    pub file_path: String,
    /// Serialized source data, opaque to storage.
    pub structured_content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for [`Draft`]. New drafts always start as pending.
#[derive(Debug, Clone)]
pub struct NewDraft {
    pub session_id: Option<i64>,
    pub owner_user_id: UserId,
    pub title: String,
    pub content: String,
    pub file_path: String,
    pub structured_content: Option<String>,
}

// ============================================================================
// Peer messages
// ============================================================================

/// A direct message between two users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMessage {
    pub id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for [`PeerMessage`].
#[derive(Debug, Clone)]
pub struct NewPeerMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
}

// ============================================================================
// Users
// ============================================================================

/// Account record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// Argon2 password hash (never exposed in API responses)
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a new user.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "User".to_string()
}
