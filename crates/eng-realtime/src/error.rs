//! Error types for the real-time module.

use eng_types::ErrorKind;
use thiserror::Error;

/// Errors that can occur in real-time operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Invalid channel format.
    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    /// Subscription limit exceeded.
    #[error("subscription limit exceeded: max {0} subscriptions")]
    SubscriptionLimit(usize),

    /// Hub connection limit reached.
    #[error("maximum connections reached: {0}")]
    TooManyConnections(usize),

    /// Client not found.
    #[error("client not found: {0}")]
    ClientNotFound(String),

    /// Session not found.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Joining would exceed the session's participant limit.
    #[error("session {session} is full ({max} participants)")]
    SessionFull { session: String, max: usize },

    /// Session has ended.
    #[error("session {0} has ended")]
    SessionEnded(String),

    /// User is not in the session.
    #[error("{user} is not a participant of session {session}")]
    ParticipantNotFound { session: String, user: String },

    /// Only the host may perform this action.
    #[error("only the host of session {session} may {action}")]
    NotHost { session: String, action: String },

    /// Session status does not allow the action.
    #[error("cannot {action} session in status {status}")]
    InvalidTransition { action: String, status: String },

    /// Invalid session settings.
    #[error("invalid session settings: {0}")]
    InvalidSettings(String),

    /// Reconnection gave up.
    #[error("connection lost after {attempts} reconnect attempts: {last_error}")]
    ReconnectExhausted { attempts: u32, last_error: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

impl RealtimeError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RealtimeError::InvalidChannel(_)
            | RealtimeError::SubscriptionLimit(_)
            | RealtimeError::InvalidSettings(_) => ErrorKind::Validation,
            RealtimeError::ClientNotFound(_)
            | RealtimeError::SessionNotFound(_)
            | RealtimeError::ParticipantNotFound { .. } => ErrorKind::NotFound,
            RealtimeError::SessionFull { .. } => ErrorKind::Conflict,
            RealtimeError::SessionEnded(_)
            | RealtimeError::NotHost { .. }
            | RealtimeError::InvalidTransition { .. } => ErrorKind::Protection,
            RealtimeError::TooManyConnections(_)
            | RealtimeError::ReconnectExhausted { .. }
            | RealtimeError::ChannelClosed => ErrorKind::Transport,
            RealtimeError::Serialization(_) => ErrorKind::Internal,
        }
    }
}
