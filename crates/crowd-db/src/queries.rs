use crate::models::UserRow;
use crate::{Database, timestamp};
use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;

impl Database {
    // -- Users --

    /// Creates the user and its profile in one transaction. Returns `false`
    /// and writes nothing when the username or handle is already taken.
    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        handle: &str,
    ) -> Result<bool> {
        let now = timestamp(Utc::now());
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let user = tx.execute(
                "INSERT OR IGNORE INTO users (id, username, password, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, &now),
            )?;
            if user == 0 {
                return Ok(false);
            }
            let profile = tx.execute(
                "INSERT OR IGNORE INTO profiles (user_id, handle, created_at) VALUES (?1, ?2, ?3)",
                (id, handle, &now),
            )?;
            if profile == 0 {
                return Ok(false);
            }
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, username))
    }

    pub fn handle_taken(&self, handle: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let taken = conn
                .query_row("SELECT 1 FROM profiles WHERE handle = ?1", [handle], |_| Ok(()))
                .optional()?
                .is_some();
            Ok(taken)
        })
    }

    /// Returns the subset of `ids` that do not name a user.
    pub fn missing_users(&self, ids: &[String]) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT 1 FROM users WHERE id = ?1")?;
            let mut missing = Vec::new();
            for id in ids {
                if stmt.query_row([id], |_| Ok(())).optional()?.is_none() {
                    missing.push(id.clone());
                }
            }
            Ok(missing)
        })
    }
}

fn query_user(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, password, created_at FROM users WHERE username = ?1")?;

    let row = stmt
        .query_row([username], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) fn add_user(db: &Database, username: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string();
    assert!(db.create_user(&id, username, "hash", username).unwrap());
    id
}
