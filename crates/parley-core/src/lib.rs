//! # parley-core
//!
//! The consistency model of Parley chats: direct conversations and groups,
//! message history, reactions, typing indicators, presence and blocking.
//!
//! [`ChatService`] is the single entry point.  It serialises access to the
//! store, stamps every mutation with a strictly increasing timestamp and
//! publishes [`ChangeEvent`](parley_shared::ChangeEvent)s once the
//! transaction has committed.

pub mod clock;
pub mod commands;
pub mod error;
pub mod events;
pub mod service;
pub mod settings;

mod access;

pub use clock::{Clock, ManualClock, SystemClock};
pub use commands::conversations::{pinned_first, ConversationSummary};
pub use commands::groups::GroupDetailsUpdate;
pub use commands::messages::ReactionOutcome;
pub use commands::users::UserPresence;
pub use error::{ChatError, ErrorKind, Result};
pub use events::EventHub;
pub use service::ChatService;
pub use settings::ChatSettings;
