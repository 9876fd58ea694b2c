//! Change notification hub.
//!
//! Mutations record what they touched in a [`Changes`] batch; the service
//! publishes the batch on a broadcast channel once the transaction commits.
//! Subscribers only learn *that* something changed and re-run their queries.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use parley_shared::constants::EVENT_CHANNEL_CAPACITY;
use parley_shared::{Audience, ChangeEvent, ChangeTopic, ConversationId, UserId};
use parley_store::Conversation;

#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<ChangeEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            // No subscribers is the normal idle state.
            if self.tx.send(event).is_err() {
                tracing::trace!("change event dropped, no subscribers");
            }
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

/// Events accumulated by one mutation.
pub(crate) struct Changes {
    at: DateTime<Utc>,
    events: Vec<ChangeEvent>,
}

impl Changes {
    pub(crate) fn new(at: DateTime<Utc>) -> Self {
        Self {
            at,
            events: Vec::new(),
        }
    }

    fn push(&mut self, topic: ChangeTopic, audience: Audience) {
        let event = ChangeEvent::new(topic, audience, self.at);
        if !self.events.contains(&event) {
            self.events.push(event);
        }
    }

    /// Conversation record changed for everyone in it.
    pub(crate) fn conversation(&mut self, conversation: &Conversation) {
        self.push(
            ChangeTopic::Conversation {
                conversation_id: conversation.id(),
            },
            Audience::Users(conversation.audience()),
        );
    }

    /// Conversation record changed only from `user`'s point of view.
    pub(crate) fn conversation_for(&mut self, conversation_id: ConversationId, user: &UserId) {
        self.push(
            ChangeTopic::Conversation { conversation_id },
            Audience::Users(vec![user.clone()]),
        );
    }

    pub(crate) fn messages(&mut self, conversation: &Conversation) {
        self.push(
            ChangeTopic::Messages {
                conversation_id: conversation.id(),
            },
            Audience::Users(conversation.audience()),
        );
    }

    pub(crate) fn messages_for(&mut self, conversation_id: ConversationId, user: &UserId) {
        self.push(
            ChangeTopic::Messages { conversation_id },
            Audience::Users(vec![user.clone()]),
        );
    }

    pub(crate) fn typing(&mut self, conversation: &Conversation) {
        self.push(
            ChangeTopic::Typing {
                conversation_id: conversation.id(),
            },
            Audience::Users(conversation.audience()),
        );
    }

    pub(crate) fn user(&mut self, user_id: &UserId, audience: Audience) {
        self.push(
            ChangeTopic::User {
                user_id: user_id.clone(),
            },
            audience,
        );
    }

    pub(crate) fn into_events(self) -> Vec<ChangeEvent> {
        self.events
    }
}
