use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Applies every schema version newer than the one recorded in `schema_version`.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (messaging schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE profiles (
                user_id     TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                handle      TEXT NOT NULL UNIQUE,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE conversations (
                id          TEXT PRIMARY KEY,
                subject     TEXT NOT NULL DEFAULT '',
                sender_id   TEXT REFERENCES users(id) ON DELETE SET NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_conversations_sender
                ON conversations(sender_id, created_at);

            CREATE TABLE conversation_recipients (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                recipient_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                status          INTEGER NOT NULL DEFAULT 1,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                UNIQUE(conversation_id, recipient_id)
            );

            CREATE INDEX idx_conversation_recipients_recipient
                ON conversation_recipients(recipient_id);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                sender_id       TEXT NOT NULL REFERENCES users(id),
                body            TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE TABLE message_recipients (
                id              TEXT PRIMARY KEY,
                message_id      TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                recipient_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                delivered_at    TEXT,
                UNIQUE(message_id, recipient_id)
            );

            CREATE TABLE comments (
                id          TEXT PRIMARY KEY,
                sender_id   TEXT NOT NULL REFERENCES users(id),
                body        TEXT NOT NULL,
                parent_id   TEXT REFERENCES comments(id),
                deleted_at  TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_comments_parent
                ON comments(parent_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (tasks and mturk hits)");
        conn.execute_batch(
            "
            CREATE TABLE tasks (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE mturk_hits (
                id          TEXT PRIMARY KEY,
                hit_id      TEXT NOT NULL,
                hit_type_id TEXT,
                task_id     TEXT NOT NULL UNIQUE REFERENCES tasks(id) ON DELETE CASCADE,
                status      INTEGER NOT NULL DEFAULT 1 CHECK (status IN (1, 2, 3)),
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    if version < 3 {
        info!("Running migration v3 (hit assignment count)");
        conn.execute_batch(
            "
            ALTER TABLE mturk_hits ADD COLUMN num_assignments INTEGER NOT NULL DEFAULT 1;

            INSERT INTO schema_version (version) VALUES (3);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
