//! CRUD operations for [`User`] records and block lists.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use parley_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{ProfileSync, User};
use crate::rows::{opt_time_at, time_at, to_millis, user_at};

impl Database {
    // ------------------------------------------------------------------
    // Create / update
    // ------------------------------------------------------------------

    /// Insert the user on first sight, otherwise refresh name and avatar.
    ///
    /// The email recorded on first sync is kept.  Returns `true` if a new row
    /// was created.
    pub fn upsert_user(&self, id: &UserId, profile: &ProfileSync, now: DateTime<Utc>) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO users (id, email, display_name, avatar_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.as_str(),
                profile.email,
                profile.display_name,
                profile.avatar_url,
                to_millis(now),
            ],
        )?;

        if inserted == 0 {
            self.conn().execute(
                "UPDATE users SET display_name = ?1, avatar_url = ?2 WHERE id = ?3",
                params![profile.display_name, profile.avatar_url, id.as_str()],
            )?;
        }
        Ok(inserted > 0)
    }

    /// Record a presence heartbeat.  Returns `false` for unknown users.
    pub fn set_last_seen(&self, id: &UserId, at: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET last_seen = ?1 WHERE id = ?2",
            params![to_millis(at), id.as_str()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        let mut user = self
            .conn()
            .query_row(
                "SELECT id, email, display_name, avatar_url, last_seen, created_at
                 FROM users WHERE id = ?1",
                params![id.as_str()],
                row_to_user,
            )
            .map_err(StoreError::from_query)?;
        user.blocked_user_ids = self.blocked_ids(id)?;
        Ok(user)
    }

    pub fn user_exists(&self, id: &UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                params![id.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All users ordered by display name, then id.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, email, display_name, avatar_url, last_seen, created_at
             FROM users
             ORDER BY COALESCE(display_name, id) COLLATE NOCASE ASC, id ASC",
        )?;
        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            let mut user = row?;
            user.blocked_user_ids = self.blocked_ids(&user.id)?;
            users.push(user);
        }
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Block list
    // ------------------------------------------------------------------

    pub fn blocked_ids(&self, id: &UserId) -> Result<BTreeSet<UserId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT blocked_id FROM blocked_users WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![id.as_str()], |row| user_at(row, 0))?;
        rows.collect::<std::result::Result<BTreeSet<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Does `user` have `other` in their block list?
    pub fn has_blocked(&self, user: &UserId, other: &UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM blocked_users WHERE user_id = ?1 AND blocked_id = ?2",
                params![user.as_str(), other.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn block_user(&self, user: &UserId, other: &UserId, now: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO blocked_users (user_id, blocked_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![user.as_str(), other.as_str(), to_millis(now)],
        )?;
        Ok(())
    }

    pub fn unblock_user(&self, user: &UserId, other: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM blocked_users WHERE user_id = ?1 AND blocked_id = ?2",
            params![user.as_str(), other.as_str()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`User`] (block list filled in by the caller).
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: user_at(row, 0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        avatar_url: row.get(3)?,
        last_seen: opt_time_at(row, 4)?,
        blocked_user_ids: BTreeSet::new(),
        created_at: time_at(row, 5)?,
    })
}
