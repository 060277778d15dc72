//! Chat session storage.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

use crate::models::{Session, SessionStatus, UserId};
use crate::{from_db_time, now, parse_column, to_db_time, SessionRepository};

const SESSION_COLUMNS: &str = "id, owner_user_id, title, status, created_at, updated_at";

/// Session store backed by SQLite.
#[derive(Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SessionStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_internal(conn: &Connection, id: i64) -> Result<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        conn.query_row(&query, params![id], row_to_session)
            .optional()
            .with_context(|| format!("Failed to get session {id}"))
    }
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    let status: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;

    Ok(Session {
        id: row.get(0)?,
        owner_user_id: row.get(1)?,
        title: row.get(2)?,
        status: parse_column(3, &status)?,
        created_at: from_db_time(4, &created_at)?,
        updated_at: from_db_time(5, &updated_at)?,
    })
}

impl SessionRepository for SessionStore {
    fn create(&self, owner_user_id: UserId, title: &str) -> Result<Session> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let now = now();

        conn.execute(
            "INSERT INTO sessions (owner_user_id, title, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![
                owner_user_id,
                title,
                SessionStatus::Reviewing.as_str(),
                to_db_time(&now)
            ],
        )
        .with_context(|| format!("Failed to create session for user {owner_user_id}"))?;

        Ok(Session {
            id: conn.last_insert_rowid(),
            owner_user_id,
            title: title.to_string(),
            status: SessionStatus::Reviewing,
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, id: i64) -> Result<Option<Session>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        Self::get_internal(&conn, id)
    }

    fn update(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let rows = conn
            .execute(
                "UPDATE sessions SET title = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    session.title,
                    session.status.as_str(),
                    to_db_time(&now()),
                    session.id
                ],
            )
            .with_context(|| format!("Failed to update session {}", session.id))?;

        if rows == 0 {
            anyhow::bail!("Session {} not found", session.id);
        }
        Ok(())
    }

    fn list_by_owner(&self, owner_user_id: UserId) -> Result<Vec<Session>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE owner_user_id = ?1
             ORDER BY created_at DESC, id DESC"
        );
        let mut stmt = conn.prepare(&query)?;
        let sessions = stmt
            .query_map(params![owner_user_id], row_to_session)?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to list sessions for user {owner_user_id}"))?;
        Ok(sessions)
    }

    fn set_status(&self, id: i64, status: SessionStatus) -> Result<Option<Session>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let rows = conn.execute(
            "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), to_db_time(&now()), id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        Self::get_internal(&conn, id)
    }

    fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let rows = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn delete_all_by_owner(&self, owner_user_id: UserId) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let rows = conn.execute(
            "DELETE FROM sessions WHERE owner_user_id = ?1",
            params![owner_user_id],
        )?;
        Ok(rows)
    }
}
