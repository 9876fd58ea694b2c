use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use parley_shared::{ConversationId, UserId};
use parley_store::{Conversation, ConversationFlag, Message, StoreError};

use crate::access::{history_cutoff, is_involved, listed_for, load_conversation, read_marker};
use crate::commands::users::UserPresence;
use crate::error::{ChatError, Result};
use crate::service::ChatService;

/// One row of the caller's conversation list.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    /// The other participant of a direct conversation.
    pub counterpart: Option<UserPresence>,
    pub last_message: Option<Message>,
    pub unread_count: u64,
    pub is_pinned: bool,
}

impl ConversationSummary {
    /// Time of the latest visible message, else conversation creation.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map(|m| m.created_at)
            .unwrap_or_else(|| self.conversation.created_at())
    }
}

/// Stable partition: pinned conversations first, order otherwise kept.
pub fn pinned_first(mut summaries: Vec<ConversationSummary>) -> Vec<ConversationSummary> {
    summaries.sort_by_key(|s| !s.is_pinned);
    summaries
}

impl ChatService {
    /// Id of the direct conversation between the caller and `other`,
    /// creating it on first contact.
    pub fn get_or_create_direct(&self, caller: &UserId, other: &UserId) -> Result<ConversationId> {
        if caller == other {
            return Err(ChatError::invalid("cannot open a conversation with yourself"));
        }
        self.mutate(|db, now, changes| {
            if !db.user_exists(other)? {
                return Err(ChatError::NotFound("User"));
            }

            let id = match db.find_direct(caller, other)? {
                Some(id) => id,
                None => {
                    let candidate = ConversationId::new();
                    if db.insert_direct(candidate, caller, other, now)? {
                        info!(conversation = %candidate, "direct conversation created");
                        changes.conversation(&load_conversation(db, candidate)?);
                        candidate
                    } else {
                        // Lost a race against the unique pair index.
                        db.find_direct(caller, other)?
                            .ok_or(ChatError::NotFound("Conversation"))?
                    }
                }
            };

            if db.clear_flag(id, caller, ConversationFlag::Deleted)? {
                debug!(conversation = %id, "direct conversation restored for caller");
                changes.conversation_for(id, caller);
            }
            Ok(id)
        })
    }

    /// Every conversation the caller takes part in and has not hidden,
    /// most recently active first.
    pub fn list_conversations(&self, caller: &UserId) -> Result<Vec<ConversationSummary>> {
        let threshold = self.settings().online_threshold;
        self.read(|db, now| {
            let mut summaries = Vec::new();
            for id in db.conversation_ids_for_user(caller)? {
                let conversation = db.get_conversation(id)?;
                if !listed_for(&conversation, caller) {
                    continue;
                }
                let cutoff = history_cutoff(&conversation, caller)?;
                let marker = read_marker(&conversation, caller);

                let counterpart = match &conversation {
                    Conversation::Direct(d) => match d.other_than(caller) {
                        Some(other) => match db.get_user(other) {
                            Ok(user) => Some(UserPresence::of(user, now, threshold)),
                            Err(StoreError::NotFound) => None,
                            Err(e) => return Err(e.into()),
                        },
                        None => None,
                    },
                    Conversation::Group(_) => None,
                };

                summaries.push(ConversationSummary {
                    last_message: db.latest_message(id, caller, cutoff)?,
                    unread_count: db.count_unread(id, caller, marker, cutoff)?,
                    is_pinned: conversation.pinned_by().contains(caller),
                    counterpart,
                    conversation,
                });
            }
            summaries.sort_by(|a, b| b.activity_at().cmp(&a.activity_at()));
            debug!(user = %caller.short(), count = summaries.len(), "listed conversations");
            Ok(summaries)
        })
    }

    /// Move the caller's read marker to now.  A caller with no place in the
    /// conversation is ignored.
    pub fn mark_as_read(&self, caller: &UserId, id: ConversationId) -> Result<()> {
        self.mutate(|db, now, changes| {
            let conversation = load_conversation(db, id)?;
            if !is_involved(&conversation, caller) {
                return Ok(());
            }
            db.set_last_read(id, caller, now)?;
            changes.conversation_for(id, caller);
            Ok(())
        })
    }

    /// Flip the caller's pin.  Returns whether the conversation is now pinned.
    pub fn toggle_pin(&self, caller: &UserId, id: ConversationId) -> Result<bool> {
        self.mutate(|db, _, changes| {
            let conversation = load_conversation(db, id)?;
            if !is_involved(&conversation, caller) {
                return Err(ChatError::denied("not a member of this conversation"));
            }
            let pinned = if db.clear_flag(id, caller, ConversationFlag::Pinned)? {
                false
            } else {
                db.set_flag(id, caller, ConversationFlag::Pinned)?;
                true
            };
            changes.conversation_for(id, caller);
            Ok(pinned)
        })
    }

    /// Hide the conversation from the caller's list.
    pub fn delete_conversation(&self, caller: &UserId, id: ConversationId) -> Result<()> {
        self.mutate(|db, _, changes| {
            let conversation = load_conversation(db, id)?;
            let involved = is_involved(&conversation, caller)
                || db.member(id, caller)?.is_some();
            if !involved {
                return Err(ChatError::denied("not a member of this conversation"));
            }
            if db.set_flag(id, caller, ConversationFlag::Deleted)? {
                info!(conversation = %id, user = %caller.short(), "conversation hidden");
                changes.conversation_for(id, caller);
            }
            Ok(())
        })
    }
}
