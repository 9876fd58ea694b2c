use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};

use parley_shared::{ConversationId, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, NewMessage, Reaction};
use crate::rows::{conversation_at, message_at, opt_message_at, time_at, to_millis, user_at};

const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, m.content, m.reply_to,
                               m.is_edited, m.is_deleted, m.created_at";

/// Messages hidden for `viewer` are filtered in SQL; `until` bounds history
/// for past members.
const VISIBLE_TO_VIEWER: &str = "NOT EXISTS (SELECT 1 FROM message_hidden h
                                            WHERE h.message_id = m.id AND h.user_id = ?2)
                                 AND (?3 IS NULL OR m.created_at <= ?3)";

impl Database {
    pub fn insert_message(&self, message: &NewMessage) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, conversation_id, sender_id, content, reply_to, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.sender_id.as_str(),
                message.content,
                message.reply_to.map(|r| r.to_string()),
                to_millis(message.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        let mut message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(StoreError::from_query)?;

        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM message_hidden WHERE message_id = ?1")?;
        let rows = stmt.query_map(params![id.to_string()], |row| user_at(row, 0))?;
        for row in rows {
            message.deleted_for.insert(row?);
        }
        message.reactions = self.get_reactions_for_message(id)?;
        Ok(message)
    }

    /// Messages of a conversation in creation order, minus those `viewer`
    /// hid for themselves and those created after `until`.
    pub fn list_messages(
        &self,
        conversation_id: ConversationId,
        viewer: &UserId,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages m
             WHERE m.conversation_id = ?1 AND {VISIBLE_TO_VIEWER}
             ORDER BY m.created_at ASC, m.seq ASC"
        ))?;
        let rows = stmt.query_map(
            params![conversation_id.to_string(), viewer.as_str(), until.map(to_millis)],
            row_to_message,
        )?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }

        self.hydrate(conversation_id, &mut messages)?;
        Ok(messages)
    }

    /// Most recent message `viewer` can see.
    pub fn latest_message(
        &self,
        conversation_id: ConversationId,
        viewer: &UserId,
        until: Option<DateTime<Utc>>,
    ) -> Result<Option<Message>> {
        let latest = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS}
                     FROM messages m
                     WHERE m.conversation_id = ?1 AND {VISIBLE_TO_VIEWER}
                     ORDER BY m.created_at DESC, m.seq DESC
                     LIMIT 1"
                ),
                params![conversation_id.to_string(), viewer.as_str(), until.map(to_millis)],
                row_to_message,
            )
            .optional()?;

        match latest {
            Some(message) => self.get_message(message.id).map(Some),
            None => Ok(None),
        }
    }

    /// Messages created strictly after `after` (and no later than `until`)
    /// that were not sent by `viewer`.
    pub fn count_unread(
        &self,
        conversation_id: ConversationId,
        viewer: &UserId,
        after: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE conversation_id = ?1
               AND sender_id != ?2
               AND created_at > ?3
               AND (?4 IS NULL OR created_at <= ?4)",
            params![
                conversation_id.to_string(),
                viewer.as_str(),
                to_millis(after),
                until.map(to_millis),
            ],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Live (not tombstoned) messages visible to `viewer` whose content
    /// contains every term.  Matching is ASCII case-insensitive; callers rank.
    pub fn search_messages(
        &self,
        conversation_id: ConversationId,
        viewer: &UserId,
        terms: &[String],
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages m
             WHERE m.conversation_id = ?1 AND m.is_deleted = 0 AND {VISIBLE_TO_VIEWER}"
        );
        let mut values = vec![
            Value::Text(conversation_id.to_string()),
            Value::Text(viewer.to_string()),
            until.map(to_millis).map(Value::Integer).unwrap_or(Value::Null),
        ];
        for term in terms {
            values.push(Value::Text(format!("%{}%", escape_like(term))));
            sql.push_str(&format!(" AND m.content LIKE ?{} ESCAPE '\\'", values.len()));
        }
        sql.push_str(" ORDER BY m.created_at DESC, m.seq DESC");

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }

        self.hydrate(conversation_id, &mut messages)?;
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Replace content and mark the message edited.
    pub fn edit_message(&self, id: MessageId, content: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET content = ?1, is_edited = 1 WHERE id = ?2",
            params![content, id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Delete for everyone: clear content, keep the row as a placeholder.
    pub fn tombstone_message(&self, id: MessageId) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET content = '', is_deleted = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Delete for one viewer.  Returns `true` if the viewer was newly added.
    pub fn hide_message(&self, id: MessageId, user: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO message_hidden (message_id, user_id) VALUES (?1, ?2)",
            params![id.to_string(), user.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Fill `deleted_for` and `reactions` for a batch of one conversation's
    /// messages with two queries.
    fn hydrate(&self, conversation_id: ConversationId, messages: &mut [Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut hidden: HashMap<MessageId, BTreeSet<UserId>> = HashMap::new();
        {
            let mut stmt = self.conn().prepare(
                "SELECT h.message_id, h.user_id
                 FROM message_hidden h JOIN messages m ON m.id = h.message_id
                 WHERE m.conversation_id = ?1",
            )?;
            let rows = stmt.query_map(params![conversation_id.to_string()], |row| {
                Ok((message_at(row, 0)?, user_at(row, 1)?))
            })?;
            for row in rows {
                let (message_id, user) = row?;
                hidden.entry(message_id).or_default().insert(user);
            }
        }

        let mut reactions = self.get_reactions_for_conversation(conversation_id)?;

        for message in messages.iter_mut() {
            message.deleted_for = hidden.remove(&message.id).unwrap_or_default();
            message.reactions = reactions.remove(&message.id).unwrap_or_default();
        }
        Ok(())
    }
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: message_at(row, 0)?,
        conversation_id: conversation_at(row, 1)?,
        sender_id: user_at(row, 2)?,
        content: row.get(3)?,
        reply_to: opt_message_at(row, 4)?,
        is_edited: row.get(5)?,
        is_deleted: row.get(6)?,
        deleted_for: BTreeSet::new(),
        reactions: Vec::<Reaction>::new(),
        created_at: time_at(row, 7)?,
    })
}
