//! Version control engine for eng.com.
//!
//! This crate implements branches, commits, diffs, three-way merges and tags
//! on top of the content-addressed [`eng_storage::ObjectStore`]. A
//! [`Repository`] ties them together for one project:
//!
//! - branch heads move only through compare-and-swap, so concurrent commits
//!   against the same head are serialized and all but one fail with
//!   [`VcsError::ConcurrentModification`];
//! - merges never guess: paths changed differently on both sides become
//!   [`MergeConflict`]s until a human supplies a [`Resolution`];
//! - state changes are published as [`RepoEvent`]s.

mod branch;
mod change;
mod diff;
mod diff3;
mod error;
mod event;
mod graph;
mod merge;
mod protection;
mod repository;
mod tag;

pub use branch::{validate_branch_name, Branch, BranchId, BranchRegistry, BranchStatus};
pub use change::{apply_edits, validate_path, Change};
pub use diff::{apply_changes, detect_renames, diff_trees, line_stats};
pub use diff3::{merge_text, MergeLabels, MergedText};
pub use error::VcsError;
pub use event::RepoEvent;
pub use graph::CommitGraph;
pub use merge::{
    three_way_merge, ConflictKind, ConflictStatus, MergeConflict, MergeOutcome, MergeStrategy,
    Resolution,
};
pub use protection::{ProtectionRule, ProtectionRules};
pub use repository::{
    CommitRequest, MergeCheck, MergeMethod, MergeOptions, Repository, RepositoryOptions,
    DEFAULT_BRANCH,
};
pub use tag::{is_prerelease_version, validate_tag_name, NewTag, Tag, TagRegistry, TagType};

/// Result type for version-control operations.
pub type Result<T> = std::result::Result<T, VcsError>;
