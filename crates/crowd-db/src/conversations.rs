use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use crate::models::{ConversationOutcome, ConversationRow, MemberRow};
use crate::queries::OptionalExt;
use crate::{Database, timestamp};

const CONVERSATION_COLUMNS: &str =
    "c.id, c.subject, c.sender_id, u.username, c.created_at, c.updated_at";

impl Database {
    /// Returns the sender's conversation whose members (sender excluded) are
    /// exactly `recipient_ids` (sender excluded), creating it when none exists.
    ///
    /// A new conversation gets a membership row for every recipient plus the
    /// sender. Everything runs in one transaction.
    pub fn find_or_create_conversation(
        &self,
        id: &str,
        sender_id: &str,
        subject: &str,
        recipient_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<ConversationOutcome> {
        let requested: BTreeSet<&str> = recipient_ids
            .iter()
            .map(String::as_str)
            .filter(|r| *r != sender_id)
            .collect();
        let now = timestamp(now);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if let Some(existing) = find_exact_match(&tx, sender_id, &requested)? {
                return Ok(ConversationOutcome {
                    conversation_id: existing,
                    created: false,
                    participants: vec![],
                });
            }

            tx.execute(
                "INSERT INTO conversations (id, subject, sender_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                (id, subject, sender_id, &now),
            )?;

            // Request order, deduplicated, sender last.
            let mut members: Vec<&str> = Vec::with_capacity(recipient_ids.len() + 1);
            for r in recipient_ids.iter().map(String::as_str) {
                if r != sender_id && !members.contains(&r) {
                    members.push(r);
                }
            }
            members.push(sender_id);

            let mut participants = Vec::with_capacity(members.len());
            {
                let mut insert = tx.prepare(
                    "INSERT OR IGNORE INTO conversation_recipients
                         (id, conversation_id, recipient_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                )?;
                let mut username =
                    tx.prepare("SELECT username FROM users WHERE id = ?1")?;
                for member in &members {
                    insert.execute((Uuid::new_v4().to_string(), id, member, &now))?;
                    let name: String = username.query_row([member], |row| row.get(0))?;
                    participants.push(name);
                }
            }

            tx.commit()?;
            Ok(ConversationOutcome {
                conversation_id: id.to_string(),
                created: true,
                participants,
            })
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM conversations c
                 LEFT JOIN users u ON c.sender_id = u.id
                 WHERE c.id = ?1",
                CONVERSATION_COLUMNS
            );
            let row = conn.query_row(&sql, [id], map_conversation).optional()?;
            Ok(row)
        })
    }

    /// Conversations `user_id` belongs to, most recently updated first.
    pub fn list_conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM conversations c
                 JOIN conversation_recipients cr ON cr.conversation_id = c.id
                 LEFT JOIN users u ON c.sender_id = u.id
                 WHERE cr.recipient_id = ?1
                 ORDER BY c.updated_at DESC, c.id",
                CONVERSATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], map_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn conversation_members(&self, conversation_id: &str) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| query_members(conn, conversation_id))
    }

    pub fn is_member(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM conversation_recipients
                     WHERE conversation_id = ?1 AND recipient_id = ?2",
                    [conversation_id, user_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            Ok(found)
        })
    }

    pub fn get_membership(&self, id: &str) -> Result<Option<MemberRow>> {
        self.with_conn(|conn| query_membership(conn, id))
    }

    /// Sets the membership status. Returns `None` when the membership does not exist.
    pub fn update_membership_status(
        &self,
        id: &str,
        status: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<MemberRow>> {
        let now = timestamp(now);
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE conversation_recipients SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status, now, id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_membership(conn, id)
        })
    }
}

fn find_exact_match(
    conn: &Connection,
    sender_id: &str,
    requested: &BTreeSet<&str>,
) -> Result<Option<String>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, cr.recipient_id
         FROM conversations c
         JOIN conversation_recipients cr ON cr.conversation_id = c.id
         WHERE c.sender_id = ?1
         ORDER BY c.created_at, c.id",
    )?;
    let pairs = stmt
        .query_map([sender_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // Rows arrive grouped by conversation; compare each group as it closes.
    let mut current: Option<(String, BTreeSet<String>)> = None;
    for (conversation_id, recipient_id) in pairs {
        if let Some((id, members)) = current.as_mut() {
            if *id == conversation_id {
                members.insert(recipient_id);
                continue;
            }
        }
        if let Some((id, members)) = current.take() {
            if same_members(&members, sender_id, requested) {
                return Ok(Some(id));
            }
        }
        current = Some((conversation_id, BTreeSet::from([recipient_id])));
    }

    Ok(current
        .filter(|(_, members)| same_members(members, sender_id, requested))
        .map(|(id, _)| id))
}

fn same_members(members: &BTreeSet<String>, sender_id: &str, requested: &BTreeSet<&str>) -> bool {
    members
        .iter()
        .map(String::as_str)
        .filter(|m| *m != sender_id)
        .eq(requested.iter().copied())
}

fn query_members(conn: &Connection, conversation_id: &str) -> Result<Vec<MemberRow>> {
    let mut stmt = conn.prepare(
        "SELECT cr.id, cr.conversation_id, cr.recipient_id, u.username, cr.status
         FROM conversation_recipients cr
         JOIN users u ON cr.recipient_id = u.id
         WHERE cr.conversation_id = ?1
         ORDER BY cr.created_at, u.username",
    )?;
    let rows = stmt
        .query_map([conversation_id], map_member)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_membership(conn: &Connection, id: &str) -> Result<Option<MemberRow>> {
    let row = conn
        .query_row(
            "SELECT cr.id, cr.conversation_id, cr.recipient_id, u.username, cr.status
             FROM conversation_recipients cr
             JOIN users u ON cr.recipient_id = u.id
             WHERE cr.id = ?1",
            [id],
            map_member,
        )
        .optional()?;
    Ok(row)
}

fn map_conversation(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        subject: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn map_member(row: &Row<'_>) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        recipient_id: row.get(2)?,
        username: row.get(3)?,
        status: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::add_user;

    fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    #[test]
    fn test_same_recipients_reuse_conversation() {
        let db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");

        let first = db
            .find_or_create_conversation(&new_id(), &alice, "hi", &[bob.clone()], Utc::now())
            .unwrap();
        assert!(first.created);
        assert_eq!(first.participants, vec!["bob", "alice"]);

        let second = db
            .find_or_create_conversation(&new_id(), &alice, "hi again", &[bob.clone()], Utc::now())
            .unwrap();
        assert!(!second.created);
        assert!(second.participants.is_empty());
        assert_eq!(second.conversation_id, first.conversation_id);
    }

    #[test]
    fn test_different_recipients_create_distinct_conversations() {
        let db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let carol = add_user(&db, "carol");

        let a = db
            .find_or_create_conversation(&new_id(), &alice, "", &[bob.clone()], Utc::now())
            .unwrap();
        let b = db
            .find_or_create_conversation(&new_id(), &alice, "", &[bob.clone(), carol.clone()], Utc::now())
            .unwrap();
        let c = db
            .find_or_create_conversation(&new_id(), &alice, "", &[carol.clone()], Utc::now())
            .unwrap();

        assert!(a.created && b.created && c.created);
        assert_ne!(a.conversation_id, b.conversation_id);
        assert_ne!(b.conversation_id, c.conversation_id);

        // Superset and subset lookups still land on the exact match.
        let again = db
            .find_or_create_conversation(&new_id(), &alice, "", &[carol, bob], Utc::now())
            .unwrap();
        assert_eq!(again.conversation_id, b.conversation_id);
    }

    #[test]
    fn test_sender_in_request_does_not_change_match() {
        let db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");

        let first = db
            .find_or_create_conversation(&new_id(), &alice, "", &[bob.clone()], Utc::now())
            .unwrap();
        let second = db
            .find_or_create_conversation(&new_id(), &alice, "", &[bob, alice.clone()], Utc::now())
            .unwrap();
        assert_eq!(second.conversation_id, first.conversation_id);
    }

    #[test]
    fn test_reuse_is_scoped_to_sender() {
        let db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let carol = add_user(&db, "carol");

        let from_alice = db
            .find_or_create_conversation(&new_id(), &alice, "", &[carol.clone()], Utc::now())
            .unwrap();
        let from_bob = db
            .find_or_create_conversation(&new_id(), &bob, "", &[carol], Utc::now())
            .unwrap();
        assert!(from_bob.created);
        assert_ne!(from_alice.conversation_id, from_bob.conversation_id);
    }

    #[test]
    fn test_sender_is_a_member() {
        let db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");

        let outcome = db
            .find_or_create_conversation(&new_id(), &alice, "", &[bob.clone(), bob.clone()], Utc::now())
            .unwrap();
        let members = db.conversation_members(&outcome.conversation_id).unwrap();
        let ids: BTreeSet<_> = members.iter().map(|m| m.recipient_id.clone()).collect();
        assert_eq!(ids, BTreeSet::from([alice.clone(), bob]));
        assert!(db.is_member(&outcome.conversation_id, &alice).unwrap());

        let convo = db.get_conversation(&outcome.conversation_id).unwrap().unwrap();
        assert_eq!(convo.sender_username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_update_membership_status() {
        let db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let outcome = db
            .find_or_create_conversation(&new_id(), &alice, "", &[bob], Utc::now())
            .unwrap();
        let member = &db.conversation_members(&outcome.conversation_id).unwrap()[0];
        assert_eq!(member.status, 1);

        let updated = db.update_membership_status(&member.id, 3, Utc::now()).unwrap().unwrap();
        assert_eq!(updated.status, 3);
        assert!(db.update_membership_status("nope", 3, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_list_conversations_for_member() {
        let db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let carol = add_user(&db, "carol");
        db.find_or_create_conversation(&new_id(), &alice, "", &[bob.clone()], Utc::now())
            .unwrap();

        assert_eq!(db.list_conversations_for_user(&bob).unwrap().len(), 1);
        assert_eq!(db.list_conversations_for_user(&alice).unwrap().len(), 1);
        assert!(db.list_conversations_for_user(&carol).unwrap().is_empty());
    }
}
