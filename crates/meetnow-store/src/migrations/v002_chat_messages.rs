//! v002 -- Authoritative message and membership tables used by the server.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Chat participants
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_participants (
    chat_id    TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    status     TEXT NOT NULL,               -- PENDING | ACCEPTED | DECLINED
    updated_at TEXT NOT NULL,

    PRIMARY KEY (chat_id, user_id)
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,  -- insertion order tie-break
    id          TEXT NOT NULL UNIQUE,               -- UUID v4
    chat_id     TEXT NOT NULL,
    author_id   TEXT NOT NULL,
    text        TEXT,
    media       TEXT NOT NULL DEFAULT '[]',         -- JSON array of MediaRef
    reply_to_id TEXT,
    created_at  TEXT NOT NULL                       -- RFC-3339, microseconds, UTC
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_created
    ON messages(chat_id, created_at DESC, seq DESC);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
