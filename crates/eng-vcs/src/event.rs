//! Repository change events.

use crate::BranchId;
use eng_storage::ContentId;
use eng_types::ProjectId;
use serde::{Deserialize, Serialize};

/// A state change in a repository, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepoEvent {
    /// Branch created.
    BranchCreated {
        project: ProjectId,
        branch_id: BranchId,
        name: String,
        head: ContentId,
    },
    /// Branch soft-deleted.
    BranchDeleted {
        project: ProjectId,
        branch_id: BranchId,
        name: String,
    },
    /// Source branch merged into target.
    BranchMerged {
        project: ProjectId,
        source_id: BranchId,
        target_id: BranchId,
        commit: ContentId,
    },
    /// A branch head advanced to a new commit.
    CommitCreated {
        project: ProjectId,
        branch_id: BranchId,
        branch: String,
        commit: ContentId,
    },
    /// Tag created.
    TagCreated {
        project: ProjectId,
        name: String,
        commit: ContentId,
    },
    /// Tag deleted.
    TagDeleted { project: ProjectId, name: String },
}

impl RepoEvent {
    /// The project the event belongs to.
    pub fn project(&self) -> &ProjectId {
        match self {
            RepoEvent::BranchCreated { project, .. }
            | RepoEvent::BranchDeleted { project, .. }
            | RepoEvent::BranchMerged { project, .. }
            | RepoEvent::CommitCreated { project, .. }
            | RepoEvent::TagCreated { project, .. }
            | RepoEvent::TagDeleted { project, .. } => project,
        }
    }

    /// Short event name, matching the serialized `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            RepoEvent::BranchCreated { .. } => "branch_created",
            RepoEvent::BranchDeleted { .. } => "branch_deleted",
            RepoEvent::BranchMerged { .. } => "branch_merged",
            RepoEvent::CommitCreated { .. } => "commit_created",
            RepoEvent::TagCreated { .. } => "tag_created",
            RepoEvent::TagDeleted { .. } => "tag_deleted",
        }
    }

    /// Returns true for events about branches or their heads.
    pub fn is_branch_event(&self) -> bool {
        !matches!(self, RepoEvent::TagCreated { .. } | RepoEvent::TagDeleted { .. })
    }
}
