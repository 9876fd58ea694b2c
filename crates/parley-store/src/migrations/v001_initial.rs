//! v001 -- Initial schema creation.
//!
//! Creates users, block lists, conversations with their member rows and
//! per-user flags, and the message log with per-viewer hides.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- identity provider subject
    email        TEXT NOT NULL,
    display_name TEXT,
    avatar_url   TEXT,
    last_seen    INTEGER,                     -- unix millis, NULL = never
    created_at   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS blocked_users (
    user_id    TEXT NOT NULL,                 -- the blocker
    blocked_id TEXT NOT NULL,                 -- the blocked user (may be unsynced)
    created_at INTEGER NOT NULL,

    PRIMARY KEY (user_id, blocked_id),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    kind        TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
    direct_low  TEXT,                         -- canonical pair, direct only
    direct_high TEXT,
    name        TEXT,                         -- group only
    description TEXT,
    avatar_url  TEXT,
    admin_id    TEXT,
    created_at  INTEGER NOT NULL
);

-- NULL pairs (groups) never collide.
CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_direct_pair
    ON conversations(direct_low, direct_high);

CREATE TABLE IF NOT EXISTS conversation_members (
    conversation_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    position        INTEGER NOT NULL,         -- join order
    status          TEXT NOT NULL DEFAULT 'active'
                    CHECK (status IN ('active', 'left', 'removed', 'wiped')),
    departed_at     INTEGER,
    last_read_at    INTEGER,                  -- NULL = never opened

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_members_user ON conversation_members(user_id);

CREATE TABLE IF NOT EXISTS conversation_flags (
    conversation_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    flag            TEXT NOT NULL CHECK (flag IN ('pinned', 'deleted')),

    PRIMARY KEY (conversation_id, user_id, flag),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    id              TEXT NOT NULL UNIQUE,     -- UUID v4
    conversation_id TEXT NOT NULL,
    sender_id       TEXT NOT NULL,
    content         TEXT NOT NULL,
    reply_to        TEXT,
    is_edited       INTEGER NOT NULL DEFAULT 0,
    is_deleted      INTEGER NOT NULL DEFAULT 0,
    created_at      INTEGER NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, created_at);

CREATE TABLE IF NOT EXISTS message_hidden (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
