//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the HTTP layer.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use parley_shared::{ConversationId, ConversationKind, MessageId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A user synced from the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Identity provider subject.
    pub id: UserId,
    pub email: String,
    /// Optional human-readable display name.
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Last presence heartbeat, if any.
    pub last_seen: Option<DateTime<Utc>>,
    /// Users this user has blocked.
    pub blocked_user_ids: BTreeSet<UserId>,
    /// When the user was first synced.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Heuristic presence: a heartbeat younger than `threshold`.
    pub fn is_online_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.last_seen
            .map(|seen| now.signed_duration_since(seen) < threshold)
            .unwrap_or(false)
    }

    pub fn has_blocked(&self, other: &UserId) -> bool {
        self.blocked_user_ids.contains(other)
    }
}

/// Profile fields pushed by the identity provider on sign-in.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileSync {
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Lifecycle of a user's membership row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    /// Current member (or direct participant).
    Active,
    /// Left voluntarily, keeps read access to earlier history.
    Left,
    /// Kicked by the admin, keeps read access to earlier history.
    Removed,
    /// Left and asked for the conversation to be wiped from their view.
    Wiped,
}

impl MemberStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberStatus::Active => "active",
            MemberStatus::Left => "left",
            MemberStatus::Removed => "removed",
            MemberStatus::Wiped => "wiped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(MemberStatus::Active),
            "left" => Some(MemberStatus::Left),
            "removed" => Some(MemberStatus::Removed),
            "wiped" => Some(MemberStatus::Wiped),
            _ => None,
        }
    }
}

/// Raw membership row as stored in `conversation_members`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRecord {
    pub user_id: UserId,
    pub position: i64,
    pub status: MemberStatus,
    pub departed_at: Option<DateTime<Utc>>,
    pub last_read_at: Option<DateTime<Utc>>,
}

/// A conversation is either a two-party chat or a named group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conversation {
    Direct(DirectConversation),
    Group(GroupConversation),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectParticipant {
    pub user_id: UserId,
    pub last_read_at: DateTime<Utc>,
}

/// 1:1 conversation.  Participants are kept in canonical (sorted) order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectConversation {
    pub id: ConversationId,
    pub participants: [DirectParticipant; 2],
    pub pinned_by: BTreeSet<UserId>,
    pub deleted_by: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
}

impl DirectConversation {
    pub fn participant(&self, user: &UserId) -> Option<&DirectParticipant> {
        self.participants.iter().find(|p| &p.user_id == user)
    }

    /// The participant that is not `user`.
    pub fn other_than(&self, user: &UserId) -> Option<&UserId> {
        if self.participant(user).is_none() {
            return None;
        }
        self.participants
            .iter()
            .map(|p| &p.user_id)
            .find(|id| *id != user)
    }
}

/// Multi-party conversation with a single admin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupConversation {
    pub id: ConversationId,
    pub name: String,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub admin_id: UserId,
    /// Current members in join order.
    pub member_ids: Vec<UserId>,
    /// Members who left or were removed and keep read access.
    pub past_member_ids: BTreeSet<UserId>,
    /// Departure time of every non-active member.
    pub departed_at: BTreeMap<UserId, DateTime<Utc>>,
    pub member_last_read: BTreeMap<UserId, DateTime<Utc>>,
    pub pinned_by: BTreeSet<UserId>,
    pub deleted_by: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
}

impl GroupConversation {
    pub fn is_member(&self, user: &UserId) -> bool {
        self.member_ids.contains(user)
    }

    pub fn is_past_member(&self, user: &UserId) -> bool {
        self.past_member_ids.contains(user)
    }
}

impl Conversation {
    pub fn id(&self) -> ConversationId {
        match self {
            Conversation::Direct(d) => d.id,
            Conversation::Group(g) => g.id,
        }
    }

    pub fn kind(&self) -> ConversationKind {
        match self {
            Conversation::Direct(_) => ConversationKind::Direct,
            Conversation::Group(_) => ConversationKind::Group,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Conversation::Direct(d) => d.created_at,
            Conversation::Group(g) => g.created_at,
        }
    }

    pub fn pinned_by(&self) -> &BTreeSet<UserId> {
        match self {
            Conversation::Direct(d) => &d.pinned_by,
            Conversation::Group(g) => &g.pinned_by,
        }
    }

    pub fn deleted_by(&self) -> &BTreeSet<UserId> {
        match self {
            Conversation::Direct(d) => &d.deleted_by,
            Conversation::Group(g) => &g.deleted_by,
        }
    }

    /// Everyone who should hear about changes: participants, current and
    /// past members.
    pub fn audience(&self) -> Vec<UserId> {
        match self {
            Conversation::Direct(d) => d.participants.iter().map(|p| p.user_id.clone()).collect(),
            Conversation::Group(g) => g
                .member_ids
                .iter()
                .chain(g.past_member_ids.iter())
                .cloned()
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One recorded reaction.  Order within a message is insertion order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub user_id: UserId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// Empty once the message is deleted for everyone.
    pub content: String,
    pub reply_to: Option<MessageId>,
    pub is_edited: bool,
    pub is_deleted: bool,
    /// Viewers who hid the message for themselves.
    pub deleted_for: BTreeSet<UserId>,
    pub reactions: Vec<Reaction>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to append a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub reply_to: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Typing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingIndicator {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}
