//! Error classification shared by every layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad class of a failure, used to decide how a caller should react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input, rejected before any state change. Fix the input and retry.
    Validation,
    /// A precondition race or an unresolved domain conflict. Re-fetch state
    /// and retry, or ask a human to resolve.
    Conflict,
    /// The referenced entity does not exist.
    NotFound,
    /// Rejected by policy. Not retryable without changing policy or state.
    Protection,
    /// A connection failed. Retried with bounded backoff.
    Transport,
    /// Storage or other unexpected failure.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Protection => "protection",
            ErrorKind::Transport => "transport",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}
