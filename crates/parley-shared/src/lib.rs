//! # parley-shared
//!
//! Identifier types, protocol constants and change-event wire types shared by
//! the store, the chat service and the HTTP server.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::IdError;
pub use protocol::{Audience, ChangeEvent, ChangeTopic};
pub use types::{ConversationId, ConversationKind, DeleteMode, MessageId, UserId};
