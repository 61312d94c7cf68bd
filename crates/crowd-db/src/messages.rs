use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use crate::models::{MessageRecipientRow, MessageRow};
use crate::queries::OptionalExt;
use crate::{Database, timestamp};

impl Database {
    /// Inserts a message, bumps the conversation's `updated_at` and stamps a
    /// delivery row for every current member, in one transaction.
    pub fn post_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<(MessageRow, Vec<MessageRecipientRow>)> {
        let stamp = timestamp(now);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, body, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                (id, conversation_id, sender_id, body, &stamp),
            )?;
            tx.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                (conversation_id, &stamp),
            )?;
            let deliveries = stamp_deliveries(&tx, id, &stamp)?;
            let message = query_message(&tx, id)?
                .ok_or_else(|| anyhow!("Message vanished after insert: {}", id))?;
            tx.commit()?;
            Ok((message, deliveries))
        })
    }

    /// Re-runs the delivery pass for an existing message. Existing rows get a
    /// fresh `delivered_at`; members who joined since get a new row.
    pub fn deliver_message(
        &self,
        message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<MessageRecipientRow>> {
        let stamp = timestamp(now);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let deliveries = stamp_deliveries(&tx, message_id, &stamp)?;
            tx.commit()?;
            Ok(deliveries)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Newest first, ordered by `(created_at, id)`. `before` is the id of the
    /// oldest message on the previous page; an id outside the conversation
    /// yields an empty page.
    pub fn get_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let cursor: Option<(String, String)> = match before {
                Some(id) => {
                    let found = conn
                        .query_row(
                            "SELECT created_at, id FROM messages WHERE id = ?1 AND conversation_id = ?2",
                            [id, conversation_id],
                            |row| Ok((row.get(0)?, row.get(1)?)),
                        )
                        .optional()?;
                    if found.is_none() {
                        return Ok(Vec::new());
                    }
                    found
                }
                None => None,
            };
            let (cursor_time, cursor_id) = cursor.unzip();

            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, body, created_at, updated_at
                 FROM messages
                 WHERE conversation_id = ?1
                   AND (?2 IS NULL OR created_at < ?2 OR (created_at = ?2 AND id < ?3))
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?4",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![conversation_id, cursor_time, cursor_id, limit],
                    map_message,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn last_message(&self, conversation_id: &str) -> Result<Option<MessageRow>> {
        Ok(self.get_messages(conversation_id, 1, None)?.into_iter().next())
    }

    pub fn message_deliveries(&self, message_id: &str) -> Result<Vec<MessageRecipientRow>> {
        self.with_conn(|conn| query_deliveries(conn, message_id))
    }
}

fn stamp_deliveries(
    conn: &Connection,
    message_id: &str,
    stamp: &str,
) -> Result<Vec<MessageRecipientRow>> {
    let recipients = {
        let mut stmt = conn.prepare(
            "SELECT cr.recipient_id
             FROM messages m
             JOIN conversation_recipients cr ON cr.conversation_id = m.conversation_id
             WHERE m.id = ?1",
        )?;
        let ids = stmt
            .query_map([message_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        ids
    };

    let mut upsert = conn.prepare(
        "INSERT INTO message_recipients (id, message_id, recipient_id, delivered_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(message_id, recipient_id) DO UPDATE SET delivered_at = excluded.delivered_at",
    )?;
    for recipient_id in &recipients {
        upsert.execute((Uuid::new_v4().to_string(), message_id, recipient_id, stamp))?;
    }

    query_deliveries(conn, message_id)
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let row = conn
        .query_row(
            "SELECT id, conversation_id, sender_id, body, created_at, updated_at
             FROM messages WHERE id = ?1",
            [id],
            map_message,
        )
        .optional()?;
    Ok(row)
}

fn query_deliveries(conn: &Connection, message_id: &str) -> Result<Vec<MessageRecipientRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, message_id, recipient_id, delivered_at
         FROM message_recipients WHERE message_id = ?1
         ORDER BY recipient_id",
    )?;
    let rows = stmt
        .query_map([message_id], |row| {
            Ok(MessageRecipientRow {
                id: row.get(0)?,
                message_id: row.get(1)?,
                recipient_id: row.get(2)?,
                delivered_at: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        body: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}
