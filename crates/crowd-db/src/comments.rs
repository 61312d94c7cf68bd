use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};

use crate::models::CommentRow;
use crate::queries::OptionalExt;
use crate::{Database, timestamp};

const COMMENT_SELECT: &str = "SELECT c.id, c.sender_id, p.handle, c.body, c.parent_id, c.deleted_at,
        c.created_at, c.updated_at
     FROM comments c
     LEFT JOIN profiles p ON p.user_id = c.sender_id";

impl Database {
    pub fn insert_comment(
        &self,
        id: &str,
        sender_id: &str,
        body: &str,
        parent_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CommentRow> {
        let stamp = timestamp(now);
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO comments (id, sender_id, body, parent_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![id, sender_id, body, parent_id, stamp],
            )?;
            query_comment(conn, id)?.ok_or_else(|| anyhow!("Comment vanished after insert: {}", id))
        })
    }

    pub fn get_comment(&self, id: &str) -> Result<Option<CommentRow>> {
        self.with_conn(|conn| query_comment(conn, id))
    }

    /// Direct replies, oldest first. Soft-deleted replies are included.
    pub fn get_replies(&self, parent_id: &str) -> Result<Vec<CommentRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE c.parent_id = ?1 ORDER BY c.created_at, c.id", COMMENT_SELECT);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([parent_id], map_comment)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Sets `deleted_at` unless already set. Returns the row as stored afterwards.
    pub fn soft_delete_comment(&self, id: &str, now: DateTime<Utc>) -> Result<Option<CommentRow>> {
        let stamp = timestamp(now);
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE comments SET deleted_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND deleted_at IS NULL",
                (&stamp, id),
            )?;
            query_comment(conn, id)
        })
    }
}

fn query_comment(conn: &Connection, id: &str) -> Result<Option<CommentRow>> {
    let sql = format!("{} WHERE c.id = ?1", COMMENT_SELECT);
    let row = conn.query_row(&sql, [id], map_comment).optional()?;
    Ok(row)
}

fn map_comment(row: &Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        sender_handle: row.get(2)?,
        body: row.get(3)?,
        parent_id: row.get(4)?,
        deleted_at: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
