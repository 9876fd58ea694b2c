//! Chat operations.
//!
//! Each sub-module adds an `impl ChatService` block for one domain.  Every
//! public method takes the authenticated caller first and runs as a single
//! read or a single transaction.

pub mod conversations;
pub mod groups;
pub mod messages;
pub mod typing;
pub mod users;
