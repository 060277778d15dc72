//! Direct (user-to-user) message storage.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

use crate::models::{NewPeerMessage, PeerMessage, UserId};
use crate::{from_db_time, now, to_db_time, PeerMessageRepository};

/// Peer message store backed by SQLite.
#[derive(Clone)]
pub struct PeerMessageStore {
    conn: Arc<Mutex<Connection>>,
}

impl PeerMessageStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

fn row_to_peer_message(row: &Row<'_>) -> rusqlite::Result<PeerMessage> {
    let created_at: String = row.get(4)?;
    Ok(PeerMessage {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        created_at: from_db_time(4, &created_at)?,
    })
}

impl PeerMessageRepository for PeerMessageStore {
    fn save(&self, message: &NewPeerMessage) -> Result<PeerMessage> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let now = now();

        conn.execute(
            "INSERT INTO peer_messages (sender_id, receiver_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                message.sender_id,
                message.receiver_id,
                message.content,
                to_db_time(&now)
            ],
        )
        .with_context(|| {
            format!(
                "Failed to save message from {} to {}",
                message.sender_id, message.receiver_id
            )
        })?;

        Ok(PeerMessage {
            id: conn.last_insert_rowid(),
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content.clone(),
            created_at: now,
        })
    }

    fn get_history(&self, user_a: UserId, user_b: UserId) -> Result<Vec<PeerMessage>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let mut stmt = conn.prepare(
            "SELECT id, sender_id, receiver_id, content, created_at FROM peer_messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC, id ASC",
        )?;
        let messages = stmt
            .query_map(params![user_a, user_b], row_to_peer_message)?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to load history between {user_a} and {user_b}"))?;
        Ok(messages)
    }
}
