use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use parley_shared::{Audience, UserId};
use parley_store::{ProfileSync, StoreError, User};

use crate::error::{ChatError, Result};
use crate::service::ChatService;

/// A user as seen by someone else, with the presence heuristic applied.
/// Block lists stay private to their owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserPresence {
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_online: bool,
}

impl UserPresence {
    pub(crate) fn of(user: User, now: DateTime<Utc>, threshold: Duration) -> Self {
        Self {
            is_online: user.is_online_at(now, threshold),
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            last_seen: user.last_seen,
        }
    }
}

fn user_not_found(e: StoreError) -> ChatError {
    match e {
        StoreError::NotFound => ChatError::NotFound("User"),
        other => ChatError::Store(other),
    }
}

impl ChatService {
    /// Create the caller's record on first sign-in, refresh it afterwards.
    pub fn sync_user(&self, caller: &UserId, profile: ProfileSync) -> Result<User> {
        self.mutate(|db, now, changes| {
            let created = db.upsert_user(caller, &profile, now)?;
            if created {
                info!(user = %caller.short(), "user created");
            } else {
                debug!(user = %caller.short(), "user profile refreshed");
            }
            changes.user(caller, Audience::Everyone);
            db.get_user(caller).map_err(user_not_found)
        })
    }

    pub fn current_user(&self, caller: &UserId) -> Result<User> {
        self.read(|db, _| db.get_user(caller).map_err(user_not_found))
    }

    /// Everyone except the caller, by display name.
    pub fn list_users(&self, caller: &UserId) -> Result<Vec<UserPresence>> {
        let threshold = self.settings().online_threshold;
        self.read(|db, now| {
            let users = db
                .list_users()?
                .into_iter()
                .filter(|u| &u.id != caller)
                .map(|user| UserPresence::of(user, now, threshold))
                .collect();
            Ok(users)
        })
    }

    /// Presence heartbeat.
    pub fn update_presence(&self, caller: &UserId) -> Result<()> {
        self.mutate(|db, now, changes| {
            if !db.set_last_seen(caller, now)? {
                return Err(ChatError::NotFound("User"));
            }
            changes.user(caller, Audience::Everyone);
            Ok(())
        })
    }

    /// Block `target`, or unblock it if already blocked.  Returns the
    /// caller's block list afterwards.
    pub fn toggle_block(&self, caller: &UserId, target: &UserId) -> Result<BTreeSet<UserId>> {
        if caller == target {
            return Err(ChatError::invalid("cannot block yourself"));
        }
        self.mutate(|db, now, changes| {
            if !db.user_exists(caller)? {
                return Err(ChatError::NotFound("User"));
            }
            if db.unblock_user(caller, target)? {
                info!(user = %caller.short(), target = %target.short(), "user unblocked");
            } else {
                db.block_user(caller, target, now)?;
                info!(user = %caller.short(), target = %target.short(), "user blocked");
            }
            changes.user(
                caller,
                Audience::Users(vec![caller.clone(), target.clone()]),
            );
            Ok(db.blocked_ids(caller)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use parley_shared::UserId;

    use crate::error::ErrorKind;
    use crate::service::testing::Fixture;

    #[test]
    fn sync_keeps_first_email() {
        let fx = Fixture::new();
        let alice = fx.user("alice");

        let updated = fx
            .service
            .sync_user(
                &alice,
                parley_store::ProfileSync {
                    email: "other@example.com".into(),
                    display_name: Some("Alice L.".into()),
                    avatar_url: Some("https://img/a.png".into()),
                },
            )
            .unwrap();
        assert_eq!(updated.email, "alice@example.com");
        assert_eq!(updated.display_name.as_deref(), Some("Alice L."));
    }

    #[test]
    fn current_user_requires_sync() {
        let fx = Fixture::new();
        let ghost = UserId::parse("ghost").unwrap();
        let err = fx.service.current_user(&ghost).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn presence_goes_stale_after_threshold() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");

        fx.service.update_presence(&bob).unwrap();
        let users = fx.service.list_users(&alice).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, bob);
        assert!(users[0].is_online);

        fx.advance_secs(61);
        let users = fx.service.list_users(&alice).unwrap();
        assert!(!users[0].is_online);
    }

    #[test]
    fn listed_users_hide_block_lists() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let carol = fx.user("carol");
        fx.service.toggle_block(&bob, &carol).unwrap();

        let users = fx.service.list_users(&alice).unwrap();
        let json = serde_json::to_value(&users).unwrap();
        assert_eq!(json[0]["id"], "bob");
        assert_eq!(json[0]["is_online"], false);
        assert!(json[0].get("blocked_user_ids").is_none());
    }

    #[test]
    fn toggle_block_round_trip() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");

        let blocked = fx.service.toggle_block(&alice, &bob).unwrap();
        assert!(blocked.contains(&bob));
        let blocked = fx.service.toggle_block(&alice, &bob).unwrap();
        assert!(blocked.is_empty());

        let err = fx.service.toggle_block(&alice, &alice).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
