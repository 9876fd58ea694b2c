//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/parley/parley.db`
    /// - macOS:   `~/Library/Application Support/chat.parley.parley/parley.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\parley\parley\data\parley.db`
    pub fn new() -> Result<Self> {
        Self::open_at(&Self::default_path()?)
    }

    /// Location used by [`Database::new`], creating the directory if needed.
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("chat", "parley", "parley").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        Ok(data_dir.join("parley.db"))
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open a private in-memory database. Used by tests and ephemeral servers.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed CRUD helpers, but direct access is
    /// occasionally needed for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside a single transaction.
    ///
    /// The transaction commits only if `f` returns `Ok`; any error rolls back
    /// every write `f` made.  The typed helpers keep working inside `f` since
    /// they share the same connection.
    pub fn atomic<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Database) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| E::from(StoreError::Sqlite(e)))?;
        let value = f(self)?;
        tx.commit().map_err(|e| E::from(StoreError::Sqlite(e)))?;
        Ok(value)
    }

    /// Latest instant recorded anywhere in the store.
    ///
    /// Covers every persisted write time, so a clock seeded from it never
    /// stamps a new write at or before one that is already stored.
    pub fn latest_write_time(&self) -> Result<Option<DateTime<Utc>>> {
        let ms: Option<i64> = self.conn.query_row(
            "SELECT MAX(ts) FROM (
                 SELECT MAX(created_at) AS ts FROM messages
                 UNION ALL SELECT MAX(created_at) FROM conversations
                 UNION ALL SELECT MAX(last_read_at) FROM conversation_members
                 UNION ALL SELECT MAX(departed_at) FROM conversation_members
                 UNION ALL SELECT MAX(created_at) FROM reactions
                 UNION ALL SELECT MAX(created_at) FROM blocked_users
                 UNION ALL SELECT MAX(created_at) FROM users
                 UNION ALL SELECT MAX(last_seen) FROM users
             )",
            [],
            |row| row.get(0),
        )?;
        Ok(ms.and_then(DateTime::<Utc>::from_timestamp_millis))
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
        drop(db);

        // Re-opening an existing file must not re-run migrations destructively.
        let db = Database::open_at(&path).expect("should reopen");
        assert!(db.path().is_some());
    }

    #[test]
    fn atomic_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();

        let result: Result<()> = db.atomic(|db| {
            db.conn().execute(
                "INSERT INTO users (id, email, created_at) VALUES ('u1', 'a@b.c', 0)",
                [],
            )?;
            Err(StoreError::NotFound)
        });
        assert!(matches!(result, Err(StoreError::NotFound)));

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn latest_write_time_spans_every_table() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.latest_write_time().unwrap(), None);

        db.conn()
            .execute_batch(
                "INSERT INTO users (id, email, created_at) VALUES ('u1', 'a@b.c', 1000);
                 INSERT INTO conversations (id, kind, created_at) VALUES ('c1', 'group', 2000);
                 INSERT INTO messages (id, conversation_id, sender_id, content, created_at)
                     VALUES ('m1', 'c1', 'u1', 'hi', 3000);",
            )
            .unwrap();
        let latest = db.latest_write_time().unwrap().map(|t| t.timestamp_millis());
        assert_eq!(latest, Some(3000));

        // A read marker newer than any message moves the floor.
        db.conn()
            .execute(
                "INSERT INTO conversation_members
                     (conversation_id, user_id, position, last_read_at)
                 VALUES ('c1', 'u1', 0, 9000)",
                [],
            )
            .unwrap();
        let latest = db.latest_write_time().unwrap().map(|t| t.timestamp_millis());
        assert_eq!(latest, Some(9000));
    }
}
