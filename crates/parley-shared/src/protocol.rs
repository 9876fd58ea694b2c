use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, UserId};

/// What changed. Subscribers re-run the queries that depend on the topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum ChangeTopic {
    /// Conversation record changed (membership, name, read markers, pins, hides)
    Conversation { conversation_id: ConversationId },

    /// Message log of a conversation changed (send, edit, delete, react)
    Messages { conversation_id: ConversationId },

    /// Typing indicators of a conversation changed
    Typing { conversation_id: ConversationId },

    /// A user profile, presence heartbeat or block list changed
    User { user_id: UserId },

    /// The subscriber missed events and must refetch everything
    Resync,
}

/// Who should be told about a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Everyone,
    Users(Vec<UserId>),
}

impl Audience {
    pub fn includes(&self, user: &UserId) -> bool {
        match self {
            Audience::Everyone => true,
            Audience::Users(users) => users.contains(user),
        }
    }
}

/// A committed change, published on the event hub and pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(flatten)]
    pub topic: ChangeTopic,
    #[serde(skip_serializing)]
    #[serde(default = "everyone")]
    pub audience: Audience,
    pub at: DateTime<Utc>,
}

fn everyone() -> Audience {
    Audience::Everyone
}

impl ChangeEvent {
    pub fn new(topic: ChangeTopic, audience: Audience, at: DateTime<Utc>) -> Self {
        Self {
            topic,
            audience,
            at,
        }
    }

    /// Serialize for a text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_hides_audience() {
        let alice = UserId::parse("alice").unwrap();
        let event = ChangeEvent::new(
            ChangeTopic::Messages {
                conversation_id: ConversationId::new(),
            },
            Audience::Users(vec![alice.clone()]),
            Utc::now(),
        );

        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["topic"], "messages");
        assert!(json.get("audience").is_none());
        assert!(json.get("conversation_id").is_some());
    }

    #[test]
    fn test_audience_includes() {
        let alice = UserId::parse("alice").unwrap();
        let bob = UserId::parse("bob").unwrap();
        let audience = Audience::Users(vec![alice.clone()]);
        assert!(audience.includes(&alice));
        assert!(!audience.includes(&bob));
        assert!(Audience::Everyone.includes(&bob));
    }
}
