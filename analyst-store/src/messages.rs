//! Chat message storage.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

use crate::models::{Message, NewMessage};
use crate::{from_db_time, now, parse_column, to_db_time, MessageRepository};

/// Message store backed by SQLite.
#[derive(Clone)]
pub struct MessageStore {
    conn: Arc<Mutex<Connection>>,
}

impl MessageStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let author: String = row.get(2)?;
    let created_at: String = row.get(4)?;

    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        author: parse_column(2, &author)?,
        text: row.get(3)?,
        created_at: from_db_time(4, &created_at)?,
    })
}

impl MessageRepository for MessageStore {
    fn save(&self, message: &NewMessage) -> Result<Message> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let now = now();

        conn.execute(
            "INSERT INTO messages (session_id, author, text, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                message.session_id,
                message.author.as_str(),
                message.text,
                to_db_time(&now)
            ],
        )
        .with_context(|| format!("Failed to save message for session {}", message.session_id))?;

        Ok(Message {
            id: conn.last_insert_rowid(),
            session_id: message.session_id,
            author: message.author,
            text: message.text.clone(),
            created_at: now,
        })
    }

    fn list_by_session(&self, session_id: i64) -> Result<Vec<Message>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, author, text, created_at FROM messages
             WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let messages = stmt
            .query_map(params![session_id], row_to_message)?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to list messages for session {session_id}"))?;
        Ok(messages)
    }

    fn delete_by_session(&self, session_id: i64) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let rows = conn.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(rows)
    }

    fn purge_orphans(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let rows = conn
            .execute(
                "DELETE FROM messages WHERE session_id NOT IN (SELECT id FROM sessions)",
                [],
            )
            .context("Failed to purge orphaned messages")?;
        if rows > 0 {
            tracing::info!(count = rows, "Purged orphaned messages");
        }
        Ok(rows)
    }
}
