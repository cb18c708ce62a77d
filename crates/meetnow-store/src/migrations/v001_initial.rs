//! v001 -- Client cache table.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Keyed JSON cache (merged chat logs, one row per chat)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS kv_cache (
    key        TEXT PRIMARY KEY NOT NULL,   -- e.g. "messages:<chat_id>"
    value      TEXT NOT NULL,               -- serde_json document
    updated_at TEXT NOT NULL                -- RFC-3339
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
