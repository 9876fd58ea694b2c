//! Typing indicator rows.  Expiry is enforced by readers; the purge helper
//! only reclaims space.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::{ConversationId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::TypingIndicator;
use crate::rows::{conversation_at, time_at, to_millis, user_at};

impl Database {
    /// Insert or refresh the (conversation, user) indicator.
    pub fn upsert_typing(
        &self,
        conversation_id: ConversationId,
        user: &UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO typing_indicators (conversation_id, user_id, expires_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (conversation_id, user_id) DO UPDATE SET expires_at = excluded.expires_at",
            params![conversation_id.to_string(), user.as_str(), to_millis(expires_at)],
        )?;
        Ok(())
    }

    /// Returns `true` if an indicator was removed.
    pub fn delete_typing(&self, conversation_id: ConversationId, user: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM typing_indicators WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id.to_string(), user.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// All stored indicators for a conversation, expired ones included.
    pub fn typing_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<TypingIndicator>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id, user_id, expires_at
             FROM typing_indicators WHERE conversation_id = ?1",
        )?;
        let rows = stmt.query_map(params![conversation_id.to_string()], |row| {
            Ok(TypingIndicator {
                conversation_id: conversation_at(row, 0)?,
                user_id: user_at(row, 1)?,
                expires_at: time_at(row, 2)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Delete rows that expired at or before `now`.  Returns the count.
    pub fn purge_expired_typing(&self, now: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM typing_indicators WHERE expires_at <= ?1",
            params![to_millis(now)],
        )?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    #[test]
    fn upsert_refreshes_single_row() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let conv = ConversationId::new();
        db.insert_direct(conv, &uid("alice"), &uid("bob"), now).unwrap();

        db.upsert_typing(conv, &uid("alice"), now + Duration::seconds(1)).unwrap();
        db.upsert_typing(conv, &uid("alice"), now + Duration::seconds(3)).unwrap();

        let rows = db.typing_for_conversation(conv).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].expires_at.timestamp_millis(),
            (now + Duration::seconds(3)).timestamp_millis()
        );

        assert!(db.delete_typing(conv, &uid("alice")).unwrap());
        assert!(!db.delete_typing(conv, &uid("alice")).unwrap());
    }

    #[test]
    fn purge_removes_only_expired() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let conv = ConversationId::new();
        db.insert_direct(conv, &uid("alice"), &uid("bob"), now).unwrap();

        db.upsert_typing(conv, &uid("alice"), now - Duration::seconds(1)).unwrap();
        db.upsert_typing(conv, &uid("bob"), now + Duration::seconds(1)).unwrap();

        assert_eq!(db.purge_expired_typing(now).unwrap(), 1);
        let rows = db.typing_for_conversation(conv).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, uid("bob"));
    }
}
