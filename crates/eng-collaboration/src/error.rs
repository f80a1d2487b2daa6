//! Error types for collaboration operations.

use eng_types::ErrorKind;
use eng_vcs::VcsError;
use thiserror::Error;

/// Errors that can occur during collaboration operations.
#[derive(Debug, Error)]
pub enum CollaborationError {
    /// Pull request not found.
    #[error("pull request not found: {project}#{number}")]
    PullRequestNotFound { project: String, number: u32 },

    /// Review not found.
    #[error("review not found: {id}")]
    ReviewNotFound { id: u64 },

    /// Conflict not found on the pull request.
    #[error("no conflict on {path} in pull request #{number}")]
    ConflictNotFound { number: u32, path: String },

    /// Required request fields are absent or blank.
    #[error("missing required fields: {}", fields.join(", "))]
    MissingFields { fields: Vec<&'static str> },

    /// Invalid state transition.
    #[error("invalid state transition: cannot {action} when state is {current_state}")]
    InvalidStateTransition {
        action: String,
        current_state: String,
    },

    /// Pull request is not open.
    #[error("pull request {project}#{number} is not open (state: {state})")]
    NotOpen {
        project: String,
        number: u32,
        state: String,
    },

    /// Pull request has unresolved conflicts.
    #[error("pull request #{number} has unresolved conflicts in: {}", paths.join(", "))]
    HasConflicts { number: u32, paths: Vec<String> },

    /// Target branch requires more approving reviews.
    #[error("{required} approving review(s) required, {actual} given")]
    InsufficientApprovals { required: u32, actual: u32 },

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),

    /// Underlying version-control failure.
    #[error(transparent)]
    Vcs(#[from] VcsError),
}

impl CollaborationError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CollaborationError::PullRequestNotFound { .. }
            | CollaborationError::ReviewNotFound { .. }
            | CollaborationError::ConflictNotFound { .. } => ErrorKind::NotFound,
            CollaborationError::MissingFields { .. } | CollaborationError::Validation(_) => {
                ErrorKind::Validation
            }
            CollaborationError::HasConflicts { .. } => ErrorKind::Conflict,
            CollaborationError::InvalidStateTransition { .. }
            | CollaborationError::NotOpen { .. }
            | CollaborationError::InsufficientApprovals { .. } => ErrorKind::Protection,
            CollaborationError::Vcs(e) => e.kind(),
        }
    }
}
