use serde::Serialize;
use thiserror::Error;

use parley_store::StoreError;

/// Error taxonomy of the chat service.  Every operation fails synchronously
/// with one of these; nothing is retried.
#[derive(Error, Debug)]
pub enum ChatError {
    /// No valid caller identity.
    #[error("Authentication required")]
    Unauthenticated,

    /// Referenced user, conversation or message does not exist (or is not
    /// visible to the caller).
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Caller lacks the required role.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// One party of a direct conversation blocked the other.
    #[error("{0}")]
    Blocked(String),

    /// Operation not allowed in the record's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    Store(StoreError),

    /// The service mutex was poisoned by a panicking holder.
    #[error("Chat service unavailable")]
    Poisoned,
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ChatError::NotFound("Record"),
            other => ChatError::Store(other),
        }
    }
}

/// Caller-visible error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthenticated,
    NotFound,
    PermissionDenied,
    BlockedRelationship,
    InvalidState,
    Internal,
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Unauthenticated => ErrorKind::Unauthenticated,
            ChatError::NotFound(_) => ErrorKind::NotFound,
            ChatError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            ChatError::Blocked(_) => ErrorKind::BlockedRelationship,
            ChatError::InvalidState(_) => ErrorKind::InvalidState,
            ChatError::Store(_) | ChatError::Poisoned => ErrorKind::Internal,
        }
    }

    pub(crate) fn denied(reason: impl Into<String>) -> Self {
        ChatError::PermissionDenied(reason.into())
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ChatError::InvalidState(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
