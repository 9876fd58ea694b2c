use std::collections::BTreeSet;

use tracing::debug;

use parley_shared::{ConversationId, UserId};

use crate::access::{ensure_can_send, history_cutoff, load_conversation};
use crate::error::Result;
use crate::service::ChatService;

impl ChatService {
    /// Announce or refresh typing for one window.
    pub fn start_typing(&self, caller: &UserId, id: ConversationId) -> Result<()> {
        let window = self.settings().typing_window;
        self.mutate(|db, now, changes| {
            let conversation = load_conversation(db, id)?;
            ensure_can_send(&conversation, caller)?;
            db.upsert_typing(id, caller, now + window)?;
            changes.typing(&conversation);
            Ok(())
        })
    }

    pub fn stop_typing(&self, caller: &UserId, id: ConversationId) -> Result<()> {
        self.mutate(|db, _, changes| {
            let conversation = load_conversation(db, id)?;
            if db.delete_typing(id, caller)? {
                changes.typing(&conversation);
            }
            Ok(())
        })
    }

    /// Everyone but the viewer whose indicator has not expired.
    pub fn active_typers(&self, viewer: &UserId, id: ConversationId) -> Result<BTreeSet<UserId>> {
        self.read(|db, now| {
            let conversation = load_conversation(db, id)?;
            history_cutoff(&conversation, viewer)?;
            Ok(db
                .typing_for_conversation(id)?
                .into_iter()
                .filter(|t| t.expires_at > now && &t.user_id != viewer)
                .map(|t| t.user_id)
                .collect())
        })
    }

    /// Drop expired indicator rows.  Returns how many were removed.
    pub fn purge_expired_typing(&self) -> Result<usize> {
        self.mutate(|db, now, _| {
            let removed = db.purge_expired_typing(now)?;
            if removed > 0 {
                debug!(removed, "purged expired typing indicators");
            }
            Ok(removed)
        })
    }
}
