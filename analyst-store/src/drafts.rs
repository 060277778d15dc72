//! Generated document (draft) storage.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

use crate::models::{Draft, DraftStatus, NewDraft, UserId};
use crate::{from_db_time, now, parse_column, to_db_time, DraftRepository};

const DRAFT_COLUMNS: &str = "id, session_id, owner_user_id, title, content, status, file_path, \
                             structured_content, created_at, updated_at";

/// Draft store backed by SQLite.
#[derive(Clone)]
pub struct DraftStore {
    conn: Arc<Mutex<Connection>>,
}

impl DraftStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_internal(conn: &Connection, id: i64) -> Result<Option<Draft>> {
        let query = format!("SELECT {DRAFT_COLUMNS} FROM drafts WHERE id = ?1");
        conn.query_row(&query, params![id], row_to_draft)
            .optional()
            .with_context(|| format!("Failed to get draft {id}"))
    }
}

fn row_to_draft(row: &Row<'_>) -> rusqlite::Result<Draft> {
    let status: String = row.get(5)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;

    Ok(Draft {
        id: row.get(0)?,
        session_id: row.get(1)?,
        owner_user_id: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        status: parse_column(5, &status)?,
        file_path: row.get(6)?,
        structured_content: row.get(7)?,
        created_at: from_db_time(8, &created_at)?,
        updated_at: from_db_time(9, &updated_at)?,
    })
}

impl DraftRepository for DraftStore {
    fn create(&self, draft: &NewDraft) -> Result<Draft> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let now = now();

        conn.execute(
            "INSERT INTO drafts (session_id, owner_user_id, title, content, status, file_path,
                                 structured_content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                draft.session_id,
                draft.owner_user_id,
                draft.title,
                draft.content,
                DraftStatus::Pending.as_str(),
                draft.file_path,
                draft.structured_content,
                to_db_time(&now),
            ],
        )
        .with_context(|| format!("Failed to create draft '{}'", draft.title))?;

        Ok(Draft {
            id: conn.last_insert_rowid(),
            session_id: draft.session_id,
            owner_user_id: draft.owner_user_id,
            title: draft.title.clone(),
            content: draft.content.clone(),
            status: DraftStatus::Pending,
            file_path: draft.file_path.clone(),
            structured_content: draft.structured_content.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    fn update(&self, draft: &Draft) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let rows = conn
            .execute(
                "UPDATE drafts SET title = ?1, content = ?2, status = ?3, file_path = ?4,
                                   structured_content = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    draft.title,
                    draft.content,
                    draft.status.as_str(),
                    draft.file_path,
                    draft.structured_content,
                    to_db_time(&draft.updated_at),
                    draft.id,
                ],
            )
            .with_context(|| format!("Failed to update draft {}", draft.id))?;

        if rows == 0 {
            anyhow::bail!("Draft {} not found", draft.id);
        }
        Ok(())
    }

    fn get(&self, id: i64) -> Result<Option<Draft>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        Self::get_internal(&conn, id)
    }

    fn get_by_session(&self, session_id: i64) -> Result<Option<Draft>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let query = format!(
            "SELECT {DRAFT_COLUMNS} FROM drafts WHERE session_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        conn.query_row(&query, params![session_id], row_to_draft)
            .optional()
            .with_context(|| format!("Failed to get draft for session {session_id}"))
    }

    fn list_by_owner(&self, owner_user_id: UserId) -> Result<Vec<Draft>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let query = format!(
            "SELECT {DRAFT_COLUMNS} FROM drafts WHERE owner_user_id = ?1
             ORDER BY created_at DESC, id DESC"
        );
        let mut stmt = conn.prepare(&query)?;
        let drafts = stmt
            .query_map(params![owner_user_id], row_to_draft)?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to list drafts for user {owner_user_id}"))?;
        Ok(drafts)
    }

    fn set_status(&self, id: i64, status: DraftStatus) -> Result<Option<Draft>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let rows = conn.execute(
            "UPDATE drafts SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), to_db_time(&now()), id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        Self::get_internal(&conn, id)
    }

    fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let rows = conn.execute("DELETE FROM drafts WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn delete_all_by_owner(&self, owner_user_id: UserId) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let rows = conn.execute(
            "DELETE FROM drafts WHERE owner_user_id = ?1",
            params![owner_user_id],
        )?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::Utc;

    fn new_draft(session_id: Option<i64>, owner: UserId, title: &str) -> NewDraft {
        NewDraft {
            session_id,
            owner_user_id: owner,
            title: title.to_string(),
            content: format!("{title} summary"),
            file_path: format!("storage/{title}.docx"),
            structured_content: Some(r#"{"project":{}}"#.to_string()),
        }
    }

    #[test]
    fn test_create_starts_pending() {
        let store = Database::open_in_memory().unwrap().drafts();
        let draft = store.create(&new_draft(Some(1), 2, "crm")).unwrap();

        assert_eq!(draft.status, DraftStatus::Pending);
        let found = store.get(draft.id).unwrap().unwrap();
        assert_eq!(found.session_id, Some(1));
        assert_eq!(found.structured_content.as_deref(), Some(r#"{"project":{}}"#));
    }

    #[test]
    fn test_ad_hoc_draft_has_no_session() {
        let store = Database::open_in_memory().unwrap().drafts();
        let draft = store.create(&new_draft(None, 2, "adhoc")).unwrap();
        assert_eq!(store.get(draft.id).unwrap().unwrap().session_id, None);
    }

    #[test]
    fn test_get_by_session_returns_latest() {
        let store = Database::open_in_memory().unwrap().drafts();
        store.create(&new_draft(Some(8), 1, "older")).unwrap();
        let newer = store.create(&new_draft(Some(8), 1, "newer")).unwrap();

        let found = store.get_by_session(8).unwrap().unwrap();
        assert_eq!(found.id, newer.id);
        assert!(store.get_by_session(9).unwrap().is_none());
    }

    #[test]
    fn test_update_overwrites_fields() {
        let store = Database::open_in_memory().unwrap().drafts();
        let mut draft = store.create(&new_draft(Some(3), 1, "v1")).unwrap();

        draft.title = "v2".into();
        draft.content = "second pass".into();
        draft.file_path = "storage/v2.docx".into();
        draft.structured_content = None;
        draft.updated_at = Utc::now();
        store.update(&draft).unwrap();

        let found = store.get(draft.id).unwrap().unwrap();
        assert_eq!(found.title, "v2");
        assert_eq!(found.content, "second pass");
        assert_eq!(found.file_path, "storage/v2.docx");
        assert!(found.structured_content.is_none());
        assert_eq!(found.created_at, draft.created_at);
    }

    #[test]
    fn test_status_lifecycle() {
        let store = Database::open_in_memory().unwrap().drafts();
        let draft = store.create(&new_draft(Some(1), 1, "x")).unwrap();

        let approved = store
            .set_status(draft.id, DraftStatus::Approved)
            .unwrap()
            .unwrap();
        assert_eq!(approved.status, DraftStatus::Approved);
        assert!(store.set_status(777, DraftStatus::Rejected).unwrap().is_none());
    }

    #[test]
    fn test_list_and_delete_by_owner() {
        let store = Database::open_in_memory().unwrap().drafts();
        let a = store.create(&new_draft(Some(1), 4, "a")).unwrap();
        let b = store.create(&new_draft(Some(2), 4, "b")).unwrap();
        store.create(&new_draft(Some(3), 5, "c")).unwrap();

        let ids: Vec<i64> = store.list_by_owner(4).unwrap().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);

        assert!(store.delete(a.id).unwrap());
        assert_eq!(store.delete_all_by_owner(4).unwrap(), 1);
        assert!(store.list_by_owner(4).unwrap().is_empty());
        assert_eq!(store.list_by_owner(5).unwrap().len(), 1);
    }
}
