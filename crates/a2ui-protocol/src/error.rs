//! Error types for the session engine.

use crate::ids::SessionId;
use thiserror::Error;

/// Errors raised by session registry and publisher operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("session {0} already has an active subscriber")]
    AlreadySubscribed(SessionId),
    #[error("outbound channel closed for session {0}")]
    ChannelClosed(SessionId),
}

impl SessionError {
    /// Push-style callers treat a vanished session as a no-op, since it may
    /// have raced with a disconnect-triggered disposal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Convenience result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
