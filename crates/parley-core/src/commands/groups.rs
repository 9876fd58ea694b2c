use serde::Deserialize;
use tracing::info;

use parley_shared::{ConversationId, UserId};
use parley_store::{
    Conversation, ConversationFlag, Database, GroupConversation, GroupDetails, MemberStatus,
};

use crate::access::load_conversation;
use crate::error::{ChatError, Result};
use crate::service::ChatService;

/// Partial update of a group's presentation.  `None` leaves a field alone;
/// an empty description or avatar clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupDetailsUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
}

fn load_group(db: &Database, id: ConversationId) -> Result<GroupConversation> {
    match load_conversation(db, id)? {
        Conversation::Group(g) => Ok(g),
        Conversation::Direct(_) => Err(ChatError::invalid("not a group conversation")),
    }
}

fn ensure_admin(group: &GroupConversation, caller: &UserId) -> Result<()> {
    if &group.admin_id == caller {
        Ok(())
    } else {
        Err(ChatError::denied("only the group admin can do this"))
    }
}

fn group_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::invalid("group name cannot be empty"));
    }
    Ok(name.to_string())
}

fn blank_to_none(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Order-preserving dedup.
fn dedup_in_order(ids: impl IntoIterator<Item = UserId>) -> Vec<UserId> {
    let mut out: Vec<UserId> = Vec::new();
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

fn ensure_synced(db: &Database, users: &[UserId]) -> Result<()> {
    for user in users {
        if !db.user_exists(user)? {
            return Err(ChatError::NotFound("User"));
        }
    }
    Ok(())
}

impl ChatService {
    /// Create a group with the creator as admin.  The creator is appended
    /// to the member list if absent.
    pub fn create_group(
        &self,
        creator: &UserId,
        name: &str,
        member_ids: Vec<UserId>,
    ) -> Result<ConversationId> {
        let name = group_name(name)?;
        let mut members = dedup_in_order(member_ids);
        if !members.contains(creator) {
            members.push(creator.clone());
        }

        self.mutate(|db, now, changes| {
            ensure_synced(db, &members)?;
            let id = ConversationId::new();
            let details = GroupDetails {
                name,
                description: None,
                avatar_url: None,
            };
            db.insert_group(id, &details, creator, &members, now)?;
            info!(conversation = %id, members = members.len(), "group created");
            changes.conversation(&load_conversation(db, id)?);
            Ok(id)
        })
    }

    pub fn rename_group(&self, caller: &UserId, id: ConversationId, name: &str) -> Result<()> {
        self.update_group_details(
            caller,
            id,
            GroupDetailsUpdate {
                name: Some(name.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn update_group_details(
        &self,
        caller: &UserId,
        id: ConversationId,
        update: GroupDetailsUpdate,
    ) -> Result<()> {
        self.mutate(|db, _, changes| {
            let group = load_group(db, id)?;
            ensure_admin(&group, caller)?;

            let details = GroupDetails {
                name: match update.name {
                    Some(name) => group_name(&name)?,
                    None => group.name,
                },
                description: match update.description {
                    Some(d) => blank_to_none(d),
                    None => group.description,
                },
                avatar_url: match update.avatar_url {
                    Some(a) => blank_to_none(a),
                    None => group.avatar_url,
                },
            };
            db.set_group_details(id, &details)?;
            info!(conversation = %id, "group details updated");
            changes.conversation(&load_conversation(db, id)?);
            Ok(())
        })
    }

    /// Add users as active members.  Past and wiped members are restored
    /// with their old read marker.  Returns the users that were added.
    pub fn add_members(
        &self,
        caller: &UserId,
        id: ConversationId,
        user_ids: Vec<UserId>,
    ) -> Result<Vec<UserId>> {
        let user_ids = dedup_in_order(user_ids);
        self.mutate(|db, _, changes| {
            let group = load_group(db, id)?;
            ensure_admin(&group, caller)?;
            ensure_synced(db, &user_ids)?;

            let mut added = Vec::new();
            for user in user_ids {
                if db.add_member(id, &user)? {
                    db.clear_flag(id, &user, ConversationFlag::Deleted)?;
                    added.push(user);
                }
            }
            if !added.is_empty() {
                info!(conversation = %id, count = added.len(), "members added");
                let updated = load_conversation(db, id)?;
                changes.conversation(&updated);
                changes.messages(&updated);
            }
            Ok(added)
        })
    }

    /// Admin removes a current member.  The target keeps read access to
    /// history up to now.
    pub fn kick_member(&self, caller: &UserId, id: ConversationId, target: &UserId) -> Result<()> {
        self.mutate(|db, now, changes| {
            let group = load_group(db, id)?;
            ensure_admin(&group, caller)?;
            if caller == target {
                return Err(ChatError::denied("the admin cannot remove themselves"));
            }
            if !group.is_member(target) {
                return Err(ChatError::NotFound("Member"));
            }

            db.set_member_status(id, target, MemberStatus::Removed, Some(now))?;
            db.delete_typing(id, target)?;
            info!(conversation = %id, target = %target.short(), "member removed");

            let updated = load_conversation(db, id)?;
            changes.conversation(&updated);
            changes.typing(&updated);
            Ok(())
        })
    }

    /// Caller leaves the group.  With `delete_history` the group also
    /// disappears from the caller's list and history access ends.
    pub fn leave_group(
        &self,
        caller: &UserId,
        id: ConversationId,
        delete_history: bool,
    ) -> Result<()> {
        self.mutate(|db, now, changes| {
            let group = load_group(db, id)?;
            if !group.is_member(caller) {
                return Err(ChatError::denied("not a member of this group"));
            }

            let status = if delete_history {
                MemberStatus::Wiped
            } else {
                MemberStatus::Left
            };
            db.set_member_status(id, caller, status, Some(now))?;
            if delete_history {
                db.set_flag(id, caller, ConversationFlag::Deleted)?;
            }
            db.delete_typing(id, caller)?;

            if &group.admin_id == caller {
                let successor = group.member_ids.iter().find(|m| *m != caller);
                if let Some(successor) = successor {
                    db.set_admin(id, successor)?;
                    info!(conversation = %id, admin = %successor.short(), "admin handed over");
                }
            }
            info!(conversation = %id, user = %caller.short(), wiped = delete_history, "member left");

            let updated = load_conversation(db, id)?;
            changes.conversation(&updated);
            changes.typing(&updated);
            changes.conversation_for(id, caller);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use parley_store::Conversation;

    use super::*;
    use crate::error::ErrorKind;
    use crate::service::testing::Fixture;

    fn group_of(fx: &Fixture, id: ConversationId, viewer: &UserId) -> GroupConversation {
        let list = fx.service.list_conversations(viewer).unwrap();
        let summary = list
            .into_iter()
            .find(|s| s.conversation.id() == id)
            .unwrap();
        match summary.conversation {
            Conversation::Group(g) => g,
            Conversation::Direct(_) => panic!("expected a group"),
        }
    }

    #[test]
    fn create_dedups_and_appends_creator() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let carol = fx.user("carol");

        let id = fx
            .service
            .create_group(&alice, " crew ", vec![bob.clone(), carol.clone(), bob.clone()])
            .unwrap();
        let group = group_of(&fx, id, &alice);
        assert_eq!(group.name, "crew");
        assert_eq!(group.admin_id, alice);
        assert_eq!(group.member_ids, vec![bob, carol, alice]);
    }

    #[test]
    fn only_admin_edits_details() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let id = fx.service.create_group(&alice, "crew", vec![bob.clone()]).unwrap();

        let err = fx.service.rename_group(&bob, id, "mine").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        fx.service
            .update_group_details(
                &alice,
                id,
                GroupDetailsUpdate {
                    description: Some("weekend plans".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        fx.service.rename_group(&alice, id, "crew 2").unwrap();

        let group = group_of(&fx, id, &bob);
        assert_eq!(group.name, "crew 2");
        assert_eq!(group.description.as_deref(), Some("weekend plans"));
    }

    #[test]
    fn group_operations_reject_direct_conversations() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let direct = fx.service.get_or_create_direct(&alice, &bob).unwrap();

        let err = fx.service.rename_group(&alice, direct, "x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn kick_rules() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let carol = fx.user("carol");
        let id = fx
            .service
            .create_group(&alice, "crew", vec![bob.clone(), carol.clone()])
            .unwrap();

        let err = fx.service.kick_member(&alice, id, &alice).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        let err = fx.service.kick_member(&bob, id, &carol).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        fx.service.kick_member(&alice, id, &bob).unwrap();
        let err = fx.service.kick_member(&alice, id, &bob).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let group = group_of(&fx, id, &bob);
        assert!(group.is_past_member(&bob));
        assert!(!group.is_member(&bob));
    }

    #[test]
    fn admin_leaving_promotes_earliest_member() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let carol = fx.user("carol");
        let id = fx
            .service
            .create_group(&alice, "crew", vec![alice.clone(), bob.clone(), carol.clone()])
            .unwrap();

        fx.service.leave_group(&alice, id, false).unwrap();
        let group = group_of(&fx, id, &carol);
        assert_eq!(group.admin_id, bob);
        assert!(group.is_past_member(&alice));

        let err = fx.service.leave_group(&alice, id, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn wiped_member_can_be_restored() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let id = fx.service.create_group(&alice, "crew", vec![bob.clone()]).unwrap();

        fx.service.leave_group(&bob, id, true).unwrap();
        assert!(fx.service.list_conversations(&bob).unwrap().is_empty());

        let added = fx
            .service
            .add_members(&alice, id, vec![bob.clone(), alice.clone()])
            .unwrap();
        assert_eq!(added, vec![bob.clone()]);

        let group = group_of(&fx, id, &bob);
        assert!(group.is_member(&bob));
        assert!(!group.deleted_by.contains(&bob));
    }
}
