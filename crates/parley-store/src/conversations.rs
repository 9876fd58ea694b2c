//! CRUD operations for [`Conversation`] records, their member rows and
//! per-user flags (pinned / deleted).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use parley_shared::{ConversationId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    Conversation, DirectConversation, DirectParticipant, GroupConversation, MemberRecord,
    MemberStatus,
};
use crate::rows::{conversation_at, opt_time_at, time_at, to_millis, user_at};

/// Per-user display flags stored in `conversation_flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationFlag {
    Pinned,
    Deleted,
}

impl ConversationFlag {
    fn as_str(self) -> &'static str {
        match self {
            ConversationFlag::Pinned => "pinned",
            ConversationFlag::Deleted => "deleted",
        }
    }
}

/// Editable group presentation fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDetails {
    pub name: String,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
}

/// Canonical ordering of a direct pair.
fn canonical_pair<'a>(a: &'a UserId, b: &'a UserId) -> (&'a UserId, &'a UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a direct conversation for the pair unless one already exists.
    ///
    /// The unique index on the canonical pair makes concurrent creation safe:
    /// the loser's insert is ignored.  Returns `true` if this call created the
    /// row.  Both read markers start at `now`.
    pub fn insert_direct(
        &self,
        id: ConversationId,
        a: &UserId,
        b: &UserId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let (low, high) = canonical_pair(a, b);
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO conversations (id, kind, direct_low, direct_high, created_at)
             VALUES (?1, 'direct', ?2, ?3, ?4)",
            params![id.to_string(), low.as_str(), high.as_str(), to_millis(now)],
        )?;
        if inserted == 0 {
            return Ok(false);
        }

        for (position, user) in [low, high].into_iter().enumerate() {
            self.conn().execute(
                "INSERT INTO conversation_members
                    (conversation_id, user_id, position, status, last_read_at)
                 VALUES (?1, ?2, ?3, 'active', ?4)",
                params![id.to_string(), user.as_str(), position as i64, to_millis(now)],
            )?;
        }
        Ok(true)
    }

    /// Insert a group with `members` (in order) as active members.
    pub fn insert_group(
        &self,
        id: ConversationId,
        details: &GroupDetails,
        admin: &UserId,
        members: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO conversations
                (id, kind, name, description, avatar_url, admin_id, created_at)
             VALUES (?1, 'group', ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                details.name,
                details.description,
                details.avatar_url,
                admin.as_str(),
                to_millis(now),
            ],
        )?;
        for member in members {
            self.add_member(id, member)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Look up the direct conversation for an unordered pair.
    pub fn find_direct(&self, a: &UserId, b: &UserId) -> Result<Option<ConversationId>> {
        let (low, high) = canonical_pair(a, b);
        self.conn()
            .query_row(
                "SELECT id FROM conversations
                 WHERE kind = 'direct' AND direct_low = ?1 AND direct_high = ?2",
                params![low.as_str(), high.as_str()],
                |row| conversation_at(row, 0),
            )
            .optional()
            .map_err(StoreError::Sqlite)
    }

    /// Load a conversation with its members and flags.
    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        let base = self
            .conn()
            .query_row(
                "SELECT kind, name, description, avatar_url, admin_id, created_at
                 FROM conversations WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(BaseRow {
                        kind: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        avatar_url: row.get(3)?,
                        admin_id: row
                            .get::<_, Option<String>>(4)?
                            .map(|_| user_at(row, 4))
                            .transpose()?,
                        created_at: time_at(row, 5)?,
                    })
                },
            )
            .map_err(StoreError::from_query)?;

        let members = self.members(id)?;
        let pinned_by = self.flagged_users(id, ConversationFlag::Pinned)?;
        let deleted_by = self.flagged_users(id, ConversationFlag::Deleted)?;

        match base.kind.as_str() {
            "direct" => assemble_direct(id, base, members, pinned_by, deleted_by),
            "group" => assemble_group(id, base, members, pinned_by, deleted_by),
            other => Err(StoreError::Corrupt(format!(
                "conversation {id} has unknown kind {other:?}"
            ))),
        }
    }

    /// Every conversation the user has a member row in, whatever its status.
    pub fn conversation_ids_for_user(&self, user: &UserId) -> Result<Vec<ConversationId>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id FROM conversation_members WHERE user_id = ?1",
        )?;
        let rows = stmt.query_map(params![user.as_str()], |row| conversation_at(row, 0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Member rows in join order.
    pub fn members(&self, id: ConversationId) -> Result<Vec<MemberRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, position, status, departed_at, last_read_at
             FROM conversation_members
             WHERE conversation_id = ?1
             ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![id.to_string()], row_to_member)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn member(&self, id: ConversationId, user: &UserId) -> Result<Option<MemberRecord>> {
        self.conn()
            .query_row(
                "SELECT user_id, position, status, departed_at, last_read_at
                 FROM conversation_members
                 WHERE conversation_id = ?1 AND user_id = ?2",
                params![id.to_string(), user.as_str()],
                row_to_member,
            )
            .optional()
            .map_err(StoreError::Sqlite)
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Make `user` an active member.
    ///
    /// New rows go to the end of the join order with no read marker.  An
    /// existing row (past or wiped member) is reactivated in place and keeps
    /// its read marker.  Returns `false` if the user was already active.
    pub fn add_member(&self, id: ConversationId, user: &UserId) -> Result<bool> {
        if let Some(existing) = self.member(id, user)? {
            if existing.status == MemberStatus::Active {
                return Ok(false);
            }
            self.set_member_status(id, user, MemberStatus::Active, None)?;
            return Ok(true);
        }

        self.conn().execute(
            "INSERT INTO conversation_members (conversation_id, user_id, position, status)
             VALUES (?1, ?2,
                     (SELECT COALESCE(MAX(position) + 1, 0)
                      FROM conversation_members WHERE conversation_id = ?1),
                     'active')",
            params![id.to_string(), user.as_str()],
        )?;
        Ok(true)
    }

    pub fn set_member_status(
        &self,
        id: ConversationId,
        user: &UserId,
        status: MemberStatus,
        departed_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE conversation_members SET status = ?1, departed_at = ?2
             WHERE conversation_id = ?3 AND user_id = ?4",
            params![
                status.as_str(),
                departed_at.map(to_millis),
                id.to_string(),
                user.as_str(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Move the user's read marker.  Replaces any previous marker.
    pub fn set_last_read(
        &self,
        id: ConversationId,
        user: &UserId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE conversation_members SET last_read_at = ?1
             WHERE conversation_id = ?2 AND user_id = ?3",
            params![to_millis(at), id.to_string(), user.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn set_admin(&self, id: ConversationId, admin: &UserId) -> Result<()> {
        self.conn().execute(
            "UPDATE conversations SET admin_id = ?1 WHERE id = ?2 AND kind = 'group'",
            params![admin.as_str(), id.to_string()],
        )?;
        Ok(())
    }

    pub fn set_group_details(&self, id: ConversationId, details: &GroupDetails) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE conversations SET name = ?1, description = ?2, avatar_url = ?3
             WHERE id = ?4 AND kind = 'group'",
            params![
                details.name,
                details.description,
                details.avatar_url,
                id.to_string(),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------

    /// Returns `true` if the flag was newly set.
    pub fn set_flag(&self, id: ConversationId, user: &UserId, flag: ConversationFlag) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO conversation_flags (conversation_id, user_id, flag)
             VALUES (?1, ?2, ?3)",
            params![id.to_string(), user.as_str(), flag.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Returns `true` if the flag was present.
    pub fn clear_flag(&self, id: ConversationId, user: &UserId, flag: ConversationFlag) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM conversation_flags
             WHERE conversation_id = ?1 AND user_id = ?2 AND flag = ?3",
            params![id.to_string(), user.as_str(), flag.as_str()],
        )?;
        Ok(affected > 0)
    }

    fn flagged_users(&self, id: ConversationId, flag: ConversationFlag) -> Result<BTreeSet<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM conversation_flags WHERE conversation_id = ?1 AND flag = ?2",
        )?;
        let rows = stmt.query_map(params![id.to_string(), flag.as_str()], |row| user_at(row, 0))?;
        rows.collect::<std::result::Result<BTreeSet<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct BaseRow {
    kind: String,
    name: Option<String>,
    description: Option<String>,
    avatar_url: Option<String>,
    admin_id: Option<UserId>,
    created_at: DateTime<Utc>,
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemberRecord> {
    let status_str: String = row.get(2)?;
    let status = MemberStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown member status {status_str:?}").into(),
        )
    })?;

    Ok(MemberRecord {
        user_id: user_at(row, 0)?,
        position: row.get(1)?,
        status,
        departed_at: opt_time_at(row, 3)?,
        last_read_at: opt_time_at(row, 4)?,
    })
}

fn assemble_direct(
    id: ConversationId,
    base: BaseRow,
    members: Vec<MemberRecord>,
    pinned_by: BTreeSet<UserId>,
    deleted_by: BTreeSet<UserId>,
) -> Result<Conversation> {
    let participants: Vec<DirectParticipant> = members
        .into_iter()
        .map(|m| {
            m.last_read_at
                .map(|last_read_at| DirectParticipant {
                    user_id: m.user_id.clone(),
                    last_read_at,
                })
                .ok_or_else(|| {
                    StoreError::Corrupt(format!("direct {id} participant without read marker"))
                })
        })
        .collect::<Result<_>>()?;

    let participants: [DirectParticipant; 2] = participants.try_into().map_err(|v: Vec<_>| {
        StoreError::Corrupt(format!("direct {id} has {} participants", v.len()))
    })?;

    Ok(Conversation::Direct(DirectConversation {
        id,
        participants,
        pinned_by,
        deleted_by,
        created_at: base.created_at,
    }))
}

fn assemble_group(
    id: ConversationId,
    base: BaseRow,
    members: Vec<MemberRecord>,
    pinned_by: BTreeSet<UserId>,
    deleted_by: BTreeSet<UserId>,
) -> Result<Conversation> {
    let admin_id = base
        .admin_id
        .ok_or_else(|| StoreError::Corrupt(format!("group {id} has no admin")))?;

    let mut member_ids = Vec::new();
    let mut past_member_ids = BTreeSet::new();
    let mut departed_at = BTreeMap::new();
    let mut member_last_read = BTreeMap::new();

    for m in members {
        if let Some(at) = m.last_read_at {
            member_last_read.insert(m.user_id.clone(), at);
        }
        if let Some(at) = m.departed_at {
            departed_at.insert(m.user_id.clone(), at);
        }
        match m.status {
            MemberStatus::Active => member_ids.push(m.user_id),
            MemberStatus::Left | MemberStatus::Removed => {
                past_member_ids.insert(m.user_id);
            }
            MemberStatus::Wiped => {}
        }
    }

    Ok(Conversation::Group(GroupConversation {
        id,
        name: base.name.unwrap_or_default(),
        description: base.description,
        avatar_url: base.avatar_url,
        admin_id,
        member_ids,
        past_member_ids,
        departed_at,
        member_last_read,
        pinned_by,
        deleted_by,
        created_at: base.created_at,
    }))
}
