//! # parley-store
//!
//! SQLite persistence for Parley chats.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for users,
//! conversations, messages, reactions and typing indicators.  It enforces
//! storage-level invariants only (unique direct pairs, one read marker and one
//! typing row per user); access rules live in `parley-core`.

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reactions;
pub mod typing;
pub mod users;

mod error;
mod rows;

pub use conversations::{ConversationFlag, GroupDetails};
pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
