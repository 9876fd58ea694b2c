use serde::Serialize;
use tracing::{debug, info};

use parley_shared::{ConversationId, DeleteMode, MessageId, UserId};
use parley_store::{Conversation, Database, Message, NewMessage, StoreError};

use crate::access::{ensure_can_send, history_cutoff, load_conversation};
use crate::error::{ChatError, Result};
use crate::service::ChatService;

/// Result of a reaction toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReactionOutcome {
    /// The emoji was added; `evicted` lists the caller's older emoji that
    /// were dropped to stay under the per-user cap.
    Added { evicted: Vec<String> },
    Removed,
}

fn load_message(db: &Database, id: MessageId) -> Result<Message> {
    db.get_message(id).map_err(|e| match e {
        StoreError::NotFound => ChatError::NotFound("Message"),
        other => ChatError::Store(other),
    })
}

/// Load a message the caller is allowed to see, with its conversation.
fn visible_message(db: &Database, caller: &UserId, id: MessageId) -> Result<(Message, Conversation)> {
    let message = load_message(db, id)?;
    let conversation = load_conversation(db, message.conversation_id)?;
    if let Some(cutoff) = history_cutoff(&conversation, caller)? {
        if message.created_at > cutoff {
            return Err(ChatError::NotFound("Message"));
        }
    }
    Ok((message, conversation))
}

/// Whitespace-separated, lowercased query terms.
fn search_terms(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_lowercase).collect()
}

fn occurrences(content: &str, terms: &[String]) -> usize {
    let haystack = content.to_lowercase();
    terms.iter().map(|t| haystack.matches(t.as_str()).count()).sum()
}

impl ChatService {
    /// History visible to the viewer, oldest first.
    pub fn list_messages(&self, viewer: &UserId, id: ConversationId) -> Result<Vec<Message>> {
        self.read(|db, _| {
            let conversation = load_conversation(db, id)?;
            let cutoff = history_cutoff(&conversation, viewer)?;
            let messages = db.list_messages(id, viewer, cutoff)?;
            debug!(conversation = %id, count = messages.len(), "listed messages");
            Ok(messages)
        })
    }

    /// Messages containing every term of `query`, best match first.
    pub fn search_messages(
        &self,
        viewer: &UserId,
        id: ConversationId,
        query: &str,
    ) -> Result<Vec<Message>> {
        let terms = search_terms(query);
        let limit = self.settings().search_limit;
        self.read(|db, _| {
            let conversation = load_conversation(db, id)?;
            let cutoff = history_cutoff(&conversation, viewer)?;
            if terms.is_empty() {
                return Ok(Vec::new());
            }

            // SQLite LIKE only folds ASCII case.
            let mut hits = if terms.iter().all(|t| t.is_ascii()) {
                db.search_messages(id, viewer, &terms, cutoff)?
            } else {
                db.list_messages(id, viewer, cutoff)?
                    .into_iter()
                    .filter(|m| !m.is_deleted)
                    .filter(|m| {
                        let content = m.content.to_lowercase();
                        terms.iter().all(|t| content.contains(t.as_str()))
                    })
                    .collect()
            };

            hits.sort_by(|a, b| {
                occurrences(&b.content, &terms)
                    .cmp(&occurrences(&a.content, &terms))
                    .then(b.created_at.cmp(&a.created_at))
            });
            hits.truncate(limit);
            Ok(hits)
        })
    }

    /// Append a message.  Returns its id.
    pub fn send(
        &self,
        sender: &UserId,
        id: ConversationId,
        content: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::invalid("message cannot be empty"));
        }

        self.mutate(|db, now, changes| {
            let conversation = load_conversation(db, id)?;
            ensure_can_send(&conversation, sender)?;

            if let Conversation::Direct(direct) = &conversation {
                if let Some(other) = direct.other_than(sender) {
                    if db.has_blocked(sender, other)? {
                        return Err(ChatError::Blocked("you have blocked this user".into()));
                    }
                    if db.has_blocked(other, sender)? {
                        return Err(ChatError::Blocked("this user has blocked you".into()));
                    }
                }
            }

            if let Some(parent) = reply_to {
                let parent = load_message(db, parent)?;
                if parent.conversation_id != id {
                    return Err(ChatError::NotFound("Message"));
                }
            }

            let message_id = MessageId::new();
            db.insert_message(&NewMessage {
                id: message_id,
                conversation_id: id,
                sender_id: sender.clone(),
                content: content.to_string(),
                reply_to,
                created_at: now,
            })?;
            db.set_last_read(id, sender, now)?;
            if db.delete_typing(id, sender)? {
                changes.typing(&conversation);
            }
            info!(conversation = %id, message = %message_id, "message sent");

            changes.messages(&conversation);
            changes.conversation(&conversation);
            Ok(message_id)
        })
    }

    /// Replace the text of the caller's own message.
    pub fn edit(&self, caller: &UserId, message_id: MessageId, content: &str) -> Result<()> {
        self.mutate(|db, _, changes| {
            let (message, conversation) = visible_message(db, caller, message_id)?;
            if message.is_deleted {
                return Err(ChatError::invalid("cannot edit a deleted message"));
            }
            if &message.sender_id != caller {
                return Err(ChatError::denied("only the sender can edit a message"));
            }
            let content = content.trim();
            if content.is_empty() {
                return Err(ChatError::invalid("message cannot be empty"));
            }

            db.edit_message(message_id, content)?;
            info!(message = %message_id, "message edited");

            changes.messages(&conversation);
            changes.conversation(&conversation);
            Ok(())
        })
    }

    pub fn delete_message(&self, caller: &UserId, message_id: MessageId, mode: DeleteMode) -> Result<()> {
        self.mutate(|db, _, changes| {
            let (message, conversation) = visible_message(db, caller, message_id)?;
            match mode {
                DeleteMode::ForEveryone => {
                    if &message.sender_id != caller {
                        return Err(ChatError::denied("only the sender can delete for everyone"));
                    }
                    if !message.is_deleted {
                        db.tombstone_message(message_id)?;
                        info!(message = %message_id, "message deleted for everyone");
                        changes.messages(&conversation);
                        changes.conversation(&conversation);
                    }
                }
                DeleteMode::ForMe => {
                    if db.hide_message(message_id, caller)? {
                        debug!(message = %message_id, user = %caller.short(), "message hidden");
                        changes.messages_for(conversation.id(), caller);
                        changes.conversation_for(conversation.id(), caller);
                    }
                }
            }
            Ok(())
        })
    }

    /// Toggle `emoji` on a message for the caller.
    pub fn react(&self, caller: &UserId, message_id: MessageId, emoji: &str) -> Result<ReactionOutcome> {
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(ChatError::invalid("reaction cannot be empty"));
        }
        let cap = self.settings().max_reactions_per_user;

        self.mutate(|db, now, changes| {
            let (message, conversation) = visible_message(db, caller, message_id)?;
            if message.is_deleted {
                return Err(ChatError::invalid("cannot react to a deleted message"));
            }

            let mine = db.user_reactions(message_id, caller)?;
            let outcome = if mine.iter().any(|e| e == emoji) {
                db.remove_reaction(message_id, caller, emoji)?;
                ReactionOutcome::Removed
            } else {
                let excess = (mine.len() + 1).saturating_sub(cap);
                let evicted: Vec<String> = mine.into_iter().take(excess).collect();
                for old in &evicted {
                    db.remove_reaction(message_id, caller, old)?;
                }
                db.add_reaction(message_id, caller, emoji, now)?;
                ReactionOutcome::Added { evicted }
            };
            debug!(message = %message_id, ?outcome, "reaction toggled");

            changes.messages(&conversation);
            Ok(outcome)
        })
    }
}
