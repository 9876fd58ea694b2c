use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::{ConversationId, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Reaction;
use crate::rows::{message_at, time_at, to_millis, user_at};

impl Database {
    /// Record a reaction.  Returns `false` if the exact (user, emoji) pair was
    /// already present.
    pub fn add_reaction(
        &self,
        message_id: MessageId,
        user: &UserId,
        emoji: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO reactions (message_id, user_id, emoji, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![message_id.to_string(), user.as_str(), emoji, to_millis(now)],
        )?;
        Ok(affected > 0)
    }

    pub fn remove_reaction(&self, message_id: MessageId, user: &UserId, emoji: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            params![message_id.to_string(), user.as_str(), emoji],
        )?;
        Ok(affected > 0)
    }

    /// Reactions on a message in insertion order.
    pub fn get_reactions_for_message(&self, message_id: MessageId) -> Result<Vec<Reaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, emoji, created_at
             FROM reactions WHERE message_id = ?1 ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            Ok(Reaction {
                user_id: user_at(row, 0)?,
                emoji: row.get(1)?,
                created_at: time_at(row, 2)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// One user's emoji on a message, oldest first.
    pub fn user_reactions(&self, message_id: MessageId, user: &UserId) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT emoji FROM reactions
             WHERE message_id = ?1 AND user_id = ?2
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![message_id.to_string(), user.as_str()], |row| {
            row.get::<_, String>(0)
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Reactions for every message of a conversation (batch query).
    pub fn get_reactions_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<HashMap<MessageId, Vec<Reaction>>> {
        let mut stmt = self.conn().prepare(
            "SELECT r.message_id, r.user_id, r.emoji, r.created_at
             FROM reactions r JOIN messages m ON m.id = r.message_id
             WHERE m.conversation_id = ?1
             ORDER BY r.seq ASC",
        )?;

        let rows = stmt.query_map(params![conversation_id.to_string()], |row| {
            Ok((
                message_at(row, 0)?,
                Reaction {
                    user_id: user_at(row, 1)?,
                    emoji: row.get(2)?,
                    created_at: time_at(row, 3)?,
                },
            ))
        })?;

        let mut map: HashMap<MessageId, Vec<Reaction>> = HashMap::new();
        for row in rows {
            let (message_id, reaction) = row?;
            map.entry(message_id).or_default().push(reaction);
        }
        Ok(map)
    }
}
