use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::MAX_USER_ID_LEN;
use crate::error::IdError;

// User identity = subject issued by the external identity provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Validate a raw identity subject.
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(IdError::EmptyUserId);
        }
        if raw.len() > MAX_USER_ID_LEN {
            return Err(IdError::UserIdTooLong(raw.len()));
        }
        if raw.chars().any(char::is_control) {
            return Err(IdError::InvalidUserId);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who may delete a message, and for whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Hide the message for the caller only.
    ForMe,
    /// Tombstone the message for every participant (sender only).
    ForEveryone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_trims_and_rejects_empty() {
        assert_eq!(UserId::parse("  user_2abc ").unwrap().as_str(), "user_2abc");
        assert!(matches!(UserId::parse("   "), Err(IdError::EmptyUserId)));
    }

    #[test]
    fn test_user_id_rejects_control_chars() {
        assert!(matches!(
            UserId::parse("user\n2"),
            Err(IdError::InvalidUserId)
        ));
    }

    #[test]
    fn test_user_id_short() {
        let id = UserId::parse("user_0123456789abcdef").unwrap();
        assert_eq!(id.short(), "user_0123456");
        let tiny = UserId::parse("u1").unwrap();
        assert_eq!(tiny.short(), "u1");
    }

    #[test]
    fn test_delete_mode_wire_names() {
        let json = serde_json::to_string(&DeleteMode::ForEveryone).unwrap();
        assert_eq!(json, "\"for_everyone\"");
        let mode: DeleteMode = serde_json::from_str("\"for_me\"").unwrap();
        assert_eq!(mode, DeleteMode::ForMe);
    }
}
