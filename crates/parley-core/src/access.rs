//! Who may see and write what.

use chrono::{DateTime, Utc};

use parley_shared::{ConversationId, UserId};
use parley_store::{Conversation, Database, StoreError};

use crate::error::{ChatError, Result};

pub(crate) fn load_conversation(db: &Database, id: ConversationId) -> Result<Conversation> {
    db.get_conversation(id).map_err(|e| match e {
        StoreError::NotFound => ChatError::NotFound("Conversation"),
        other => ChatError::Store(other),
    })
}

/// Read access check.  `Ok(None)` means full history; `Ok(Some(t))` means
/// history up to the caller's departure at `t`.
pub(crate) fn history_cutoff(
    conversation: &Conversation,
    user: &UserId,
) -> Result<Option<DateTime<Utc>>> {
    match conversation {
        Conversation::Direct(d) if d.participant(user).is_some() => Ok(None),
        Conversation::Group(g) if g.is_member(user) => Ok(None),
        Conversation::Group(g) if g.is_past_member(user) => Ok(g.departed_at.get(user).copied()),
        _ => Err(ChatError::denied("not a member of this conversation")),
    }
}

/// Write access: participant of a direct chat or current group member.
pub(crate) fn ensure_can_send(conversation: &Conversation, user: &UserId) -> Result<()> {
    let allowed = match conversation {
        Conversation::Direct(d) => d.participant(user).is_some(),
        Conversation::Group(g) => g.is_member(user),
    };
    if allowed {
        Ok(())
    } else {
        Err(ChatError::denied("not a member of this conversation"))
    }
}

/// Direct participant, current member or past member.
pub(crate) fn is_involved(conversation: &Conversation, user: &UserId) -> bool {
    history_cutoff(conversation, user).is_ok()
}

/// The caller's read marker.  Group members who never read fall back to the
/// group's creation time.
pub(crate) fn read_marker(conversation: &Conversation, user: &UserId) -> DateTime<Utc> {
    match conversation {
        Conversation::Direct(d) => d
            .participant(user)
            .map(|p| p.last_read_at)
            .unwrap_or(d.created_at),
        Conversation::Group(g) => g
            .member_last_read
            .get(user)
            .copied()
            .unwrap_or(g.created_at),
    }
}

/// Whether the conversation shows up in `user`'s list.
pub(crate) fn listed_for(conversation: &Conversation, user: &UserId) -> bool {
    is_involved(conversation, user) && !conversation.deleted_by().contains(user)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::Duration;
    use parley_store::GroupConversation;

    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn group(now: DateTime<Utc>) -> Conversation {
        let departed = now + Duration::seconds(5);
        Conversation::Group(GroupConversation {
            id: ConversationId::new(),
            name: "crew".into(),
            description: None,
            avatar_url: None,
            admin_id: uid("alice"),
            member_ids: vec![uid("alice"), uid("carol")],
            past_member_ids: BTreeSet::from([uid("bob")]),
            departed_at: BTreeMap::from([(uid("bob"), departed), (uid("dave"), departed)]),
            member_last_read: BTreeMap::from([(uid("carol"), departed)]),
            pinned_by: BTreeSet::new(),
            deleted_by: BTreeSet::from([uid("dave")]),
            created_at: now,
        })
    }

    #[test]
    fn past_members_read_until_departure() {
        let now = Utc::now();
        let conv = group(now);

        assert_eq!(history_cutoff(&conv, &uid("alice")).unwrap(), None);
        assert_eq!(
            history_cutoff(&conv, &uid("bob")).unwrap(),
            Some(now + Duration::seconds(5))
        );
        assert!(history_cutoff(&conv, &uid("dave")).is_err());
        assert!(ensure_can_send(&conv, &uid("bob")).is_err());
        assert!(ensure_can_send(&conv, &uid("carol")).is_ok());
    }

    #[test]
    fn group_marker_defaults_to_creation() {
        let now = Utc::now();
        let conv = group(now);
        assert_eq!(read_marker(&conv, &uid("alice")), now);
        assert_eq!(read_marker(&conv, &uid("carol")), now + Duration::seconds(5));
        assert!(listed_for(&conv, &uid("bob")));
        assert!(!listed_for(&conv, &uid("dave")));
    }
}
