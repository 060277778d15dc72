//! SQLite persistence for the Analyst services.
//!
//! One [`Database`] owns the connection. Each table gets a small store type
//! that shares it, and each store sits behind a repository trait so the
//! gateway engines can be handed `Arc<dyn ...>` and tests can swap in
//! failing implementations.

pub mod drafts;
pub mod messages;
pub mod models;
pub mod peer;
pub mod sessions;
pub mod users;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use drafts::DraftStore;
pub use messages::MessageStore;
pub use models::{
    Author, CreateUserRequest, Draft, DraftStatus, Message, NewDraft, NewMessage,
    NewPeerMessage, ParseEnumError, PeerMessage, Session, SessionStatus, User, UserId,
    ANONYMOUS_USER,
};
pub use peer::PeerMessageStore;
pub use sessions::SessionStore;
pub use users::{UserStore, ADMIN_ROLE};

const SCHEMA: &str = include_str!("schema.sql");

/// Shared handle to the SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        tracing::info!(path = %path.display(), "Database opened");
        Self::init(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to apply database schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn users(&self) -> UserStore {
        UserStore::new(self.conn.clone())
    }

    pub fn sessions(&self) -> SessionStore {
        SessionStore::new(self.conn.clone())
    }

    pub fn messages(&self) -> MessageStore {
        MessageStore::new(self.conn.clone())
    }

    pub fn drafts(&self) -> DraftStore {
        DraftStore::new(self.conn.clone())
    }

    pub fn peer_messages(&self) -> PeerMessageStore {
        PeerMessageStore::new(self.conn.clone())
    }
}

// ============================================================================
// Repository traits
// ============================================================================

/// Chat session persistence.
pub trait SessionRepository: Send + Sync {
    /// Insert a session in `reviewing` state.
    fn create(&self, owner_user_id: UserId, title: &str) -> Result<Session>;
    fn get(&self, id: i64) -> Result<Option<Session>>;
    /// Write title and status back, bumping `updated_at`.
    fn update(&self, session: &Session) -> Result<()>;
    /// Newest first.
    fn list_by_owner(&self, owner_user_id: UserId) -> Result<Vec<Session>>;
    fn set_status(&self, id: i64, status: SessionStatus) -> Result<Option<Session>>;
    fn delete(&self, id: i64) -> Result<bool>;
    fn delete_all_by_owner(&self, owner_user_id: UserId) -> Result<usize>;
}

/// Chat message persistence.
pub trait MessageRepository: Send + Sync {
    fn save(&self, message: &NewMessage) -> Result<Message>;
    /// Oldest first.
    fn list_by_session(&self, session_id: i64) -> Result<Vec<Message>>;
    fn delete_by_session(&self, session_id: i64) -> Result<usize>;
    /// Remove messages whose session no longer exists.
    fn purge_orphans(&self) -> Result<usize>;
}

/// Generated document persistence.
pub trait DraftRepository: Send + Sync {
    fn create(&self, draft: &NewDraft) -> Result<Draft>;
    /// Overwrite title, content, file path, structured content and status.
    fn update(&self, draft: &Draft) -> Result<()>;
    fn get(&self, id: i64) -> Result<Option<Draft>>;
    /// Most recent draft for the session, if any.
    fn get_by_session(&self, session_id: i64) -> Result<Option<Draft>>;
    fn list_by_owner(&self, owner_user_id: UserId) -> Result<Vec<Draft>>;
    fn set_status(&self, id: i64, status: DraftStatus) -> Result<Option<Draft>>;
    fn delete(&self, id: i64) -> Result<bool>;
    fn delete_all_by_owner(&self, owner_user_id: UserId) -> Result<usize>;
}

/// Direct message persistence.
pub trait PeerMessageRepository: Send + Sync {
    fn save(&self, message: &NewPeerMessage) -> Result<PeerMessage>;
    /// Both directions between the pair, oldest first.
    fn get_history(&self, user_a: UserId, user_b: UserId) -> Result<Vec<PeerMessage>>;
}

// ============================================================================
// Timestamp helpers
// ============================================================================

/// Current time at the precision the database keeps.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn to_db_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn from_db_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_column<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = ParseEnumError>,
{
    raw.parse().map_err(|e: ParseEnumError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
