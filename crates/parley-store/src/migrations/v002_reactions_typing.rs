use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Reactions: seq gives per-user insertion order for oldest-first eviction
CREATE TABLE IF NOT EXISTS reactions (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT NOT NULL,              -- FK -> messages(id)
    user_id    TEXT NOT NULL,
    emoji      TEXT NOT NULL,              -- emoji character(s)
    created_at INTEGER NOT NULL,           -- unix millis

    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_reactions_message ON reactions(message_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_reactions_unique ON reactions(message_id, user_id, emoji);

-- Typing indicators: one row per (conversation, user); expiry is checked on read
CREATE TABLE IF NOT EXISTS typing_indicators (
    conversation_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    expires_at      INTEGER NOT NULL,      -- unix millis

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
