use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};

use crate::models::{HitRow, TaskRow};
use crate::queries::OptionalExt;
use crate::{Database, timestamp};

const HIT_COLUMNS: &str =
    "id, hit_id, hit_type_id, task_id, status, num_assignments, created_at, updated_at";

impl Database {
    // -- Tasks --

    pub fn create_task(&self, id: &str, name: &str, now: DateTime<Utc>) -> Result<TaskRow> {
        let stamp = timestamp(now);
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, name, created_at) VALUES (?1, ?2, ?3)",
                (id, name, &stamp),
            )?;
            Ok(TaskRow {
                id: id.to_string(),
                name: name.to_string(),
                created_at: stamp,
            })
        })
    }

    pub fn task_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row("SELECT 1 FROM tasks WHERE id = ?1", [id], |_| Ok(()))
                .optional()?
                .is_some();
            Ok(found)
        })
    }

    // -- HITs --

    /// Attaches a HIT to a task. Returns `None` when the task already has one.
    pub fn create_hit(
        &self,
        id: &str,
        task_id: &str,
        hit_id: &str,
        hit_type_id: Option<&str>,
        num_assignments: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<HitRow>> {
        let stamp = timestamp(now);
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO mturk_hits
                     (id, hit_id, hit_type_id, task_id, num_assignments, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![id, hit_id, hit_type_id, task_id, num_assignments, stamp],
            )?;
            if inserted == 0 {
                return Ok(None);
            }
            query_hit(conn, "id", id)?
                .map(Some)
                .ok_or_else(|| anyhow!("HIT vanished after insert: {}", id))
        })
    }

    pub fn get_hit_for_task(&self, task_id: &str) -> Result<Option<HitRow>> {
        self.with_conn(|conn| query_hit(conn, "task_id", task_id))
    }

    /// Updates status and/or assignment count; `None` fields keep their value.
    pub fn update_hit(
        &self,
        id: &str,
        status: Option<i64>,
        num_assignments: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Option<HitRow>> {
        let stamp = timestamp(now);
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE mturk_hits
                 SET status = COALESCE(?1, status),
                     num_assignments = COALESCE(?2, num_assignments),
                     updated_at = ?3
                 WHERE id = ?4",
                rusqlite::params![status, num_assignments, stamp, id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_hit(conn, "id", id)
        })
    }
}

fn query_hit(conn: &Connection, column: &str, value: &str) -> Result<Option<HitRow>> {
    let sql = format!("SELECT {} FROM mturk_hits WHERE {} = ?1", HIT_COLUMNS, column);
    let row = conn.query_row(&sql, [value], map_hit).optional()?;
    Ok(row)
}

fn map_hit(row: &Row<'_>) -> rusqlite::Result<HitRow> {
    Ok(HitRow {
        id: row.get(0)?,
        hit_id: row.get(1)?,
        hit_type_id: row.get(2)?,
        task_id: row.get(3)?,
        status: row.get(4)?,
        num_assignments: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_hit_per_task() {
        let db = Database::open_in_memory().unwrap();
        db.create_task("t1", "label images", Utc::now()).unwrap();

        let hit = db
            .create_hit("h1", "t1", "3ABCD", None, 1, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(hit.status, 1);
        assert_eq!(hit.num_assignments, 1);

        let dup = db.create_hit("h2", "t1", "3EFGH", None, 1, Utc::now()).unwrap();
        assert!(dup.is_none());
        assert_eq!(db.get_hit_for_task("t1").unwrap().unwrap().id, "h1");
    }

    #[test]
    fn test_update_hit_keeps_unset_fields() {
        let db = Database::open_in_memory().unwrap();
        db.create_task("t1", "survey", Utc::now()).unwrap();
        db.create_hit("h1", "t1", "3ABCD", Some("type"), 5, Utc::now()).unwrap();

        let updated = db.update_hit("h1", Some(2), None, Utc::now()).unwrap().unwrap();
        assert_eq!(updated.status, 2);
        assert_eq!(updated.num_assignments, 5);
        assert_eq!(updated.hit_type_id.as_deref(), Some("type"));

        assert!(db.update_hit("h1", Some(9), None, Utc::now()).is_err());
        assert!(db.update_hit("missing", Some(2), None, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_hit_requires_task() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.task_exists("t1").unwrap());
        assert!(db.create_hit("h1", "t1", "3ABCD", None, 1, Utc::now()).is_err());
    }
}
