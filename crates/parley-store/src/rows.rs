//! Column conversion helpers shared by the CRUD modules.
//!
//! Timestamps are stored as INTEGER unix milliseconds, identifiers as TEXT.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use uuid::Uuid;

use parley_shared::{ConversationId, MessageId, UserId};

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn conversion<E>(idx: usize, ty: Type, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(e))
}

#[derive(Debug)]
struct OutOfRange(i64);

impl std::fmt::Display for OutOfRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timestamp out of range: {}", self.0)
    }
}

impl std::error::Error for OutOfRange {}

pub(crate) fn time_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| conversion(idx, Type::Integer, OutOfRange(ms)))
}

pub(crate) fn opt_time_at(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.get(idx)?;
    ms.map(|ms| {
        DateTime::<Utc>::from_timestamp_millis(ms)
            .ok_or_else(|| conversion(idx, Type::Integer, OutOfRange(ms)))
    })
    .transpose()
}

pub(crate) fn user_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<UserId> {
    let raw: String = row.get(idx)?;
    UserId::parse(&raw).map_err(|e| conversion(idx, Type::Text, e))
}

fn uuid_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion(idx, Type::Text, e))
}

pub(crate) fn conversation_at(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<ConversationId> {
    uuid_at(row, idx).map(ConversationId)
}

pub(crate) fn message_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<MessageId> {
    uuid_at(row, idx).map(MessageId)
}

pub(crate) fn opt_message_at(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<MessageId>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        Uuid::parse_str(&s)
            .map(MessageId)
            .map_err(|e| conversion(idx, Type::Text, e))
    })
    .transpose()
}
