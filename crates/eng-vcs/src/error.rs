//! Error types for version-control operations.

use eng_storage::StorageError;
use eng_types::ErrorKind;
use thiserror::Error;

/// Errors that can occur during version-control operations.
#[derive(Debug, Error)]
pub enum VcsError {
    /// Branch or tag name failed validation.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// File path failed validation.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Commit message is blank.
    #[error("commit message must not be empty")]
    EmptyMessage,

    /// Commit has no effective changes.
    #[error("no changes to commit")]
    NoChanges,

    /// Release tag name is not a semantic version.
    #[error("release tag {0:?} is not a semantic version (expected v1.2.3)")]
    InvalidVersionFormat(String),

    /// Entity with that name already exists.
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    /// Branch head moved since the caller read it.
    #[error("branch {branch} was modified concurrently: expected head {expected}, found {actual}")]
    ConcurrentModification {
        branch: String,
        expected: String,
        actual: String,
    },

    /// Merge produced conflicts without resolutions.
    #[error("unresolved conflicts in: {}", paths.join(", "))]
    UnresolvedConflicts { paths: Vec<String> },

    /// A file change does not apply to the tree.
    #[error("change to {path} does not apply: {reason}")]
    PatchDoesNotApply { path: String, reason: String },

    /// Branch not found.
    #[error("branch not found: {0}")]
    BranchNotFound(String),

    /// Commit not found.
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// Tag not found.
    #[error("tag not found: {0}")]
    TagNotFound(String),

    /// Path not present in the tree.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// Two commits share no history.
    #[error("no common ancestor between {a} and {b}")]
    NoCommonAncestor { a: String, b: String },

    /// Default branch cannot be deleted.
    #[error("branch {0} is the default branch")]
    ProtectedBranch(String),

    /// Protection rules forbid the operation.
    #[error("branch {branch} is protected: {reason}")]
    BranchProtected { branch: String, reason: String },

    /// Branch was merged or deleted and no longer accepts writes.
    #[error("branch {branch} is {status}")]
    BranchNotActive { branch: String, status: String },

    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Snapshot (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Snapshot I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VcsError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VcsError::InvalidName { .. }
            | VcsError::InvalidPath { .. }
            | VcsError::EmptyMessage
            | VcsError::NoChanges
            | VcsError::InvalidVersionFormat(_) => ErrorKind::Validation,

            VcsError::AlreadyExists { .. }
            | VcsError::ConcurrentModification { .. }
            | VcsError::UnresolvedConflicts { .. }
            | VcsError::PatchDoesNotApply { .. } => ErrorKind::Conflict,

            VcsError::BranchNotFound(_)
            | VcsError::CommitNotFound(_)
            | VcsError::TagNotFound(_)
            | VcsError::PathNotFound(_)
            | VcsError::NoCommonAncestor { .. } => ErrorKind::NotFound,

            VcsError::ProtectedBranch(_)
            | VcsError::BranchProtected { .. }
            | VcsError::BranchNotActive { .. } => ErrorKind::Protection,

            VcsError::Storage(e) => e.kind(),
            VcsError::Serialization(_) | VcsError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Maps a storage miss on a commit id to [`VcsError::CommitNotFound`].
    pub(crate) fn commit_lookup(id: &eng_storage::ContentId, err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) | StorageError::WrongKind { .. } => {
                VcsError::CommitNotFound(id.to_hex())
            }
            other => VcsError::Storage(other),
        }
    }
}
