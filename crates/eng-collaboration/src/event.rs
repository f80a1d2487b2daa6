//! Pull request events.

use eng_storage::ContentId;
use eng_types::{ProjectId, UserId};
use serde::{Deserialize, Serialize};

use crate::ReviewState;

/// A pull request state change, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PullRequestEvent {
    PullRequestOpened {
        project: ProjectId,
        number: u32,
        title: String,
        author: UserId,
        mergeable: bool,
    },
    PullRequestMerged {
        project: ProjectId,
        number: u32,
        merged_by: UserId,
        commit: ContentId,
    },
    PullRequestClosed {
        project: ProjectId,
        number: u32,
    },
    /// The conflict check flipped the `mergeable` flag.
    MergeabilityChanged {
        project: ProjectId,
        number: u32,
        mergeable: bool,
    },
    ReviewSubmitted {
        project: ProjectId,
        number: u32,
        reviewer: UserId,
        state: ReviewState,
    },
}

impl PullRequestEvent {
    /// The project the event belongs to.
    pub fn project(&self) -> &ProjectId {
        match self {
            PullRequestEvent::PullRequestOpened { project, .. }
            | PullRequestEvent::PullRequestMerged { project, .. }
            | PullRequestEvent::PullRequestClosed { project, .. }
            | PullRequestEvent::MergeabilityChanged { project, .. }
            | PullRequestEvent::ReviewSubmitted { project, .. } => project,
        }
    }

    /// The pull request number the event refers to.
    pub fn number(&self) -> u32 {
        match self {
            PullRequestEvent::PullRequestOpened { number, .. }
            | PullRequestEvent::PullRequestMerged { number, .. }
            | PullRequestEvent::PullRequestClosed { number, .. }
            | PullRequestEvent::MergeabilityChanged { number, .. }
            | PullRequestEvent::ReviewSubmitted { number, .. } => *number,
        }
    }

    /// Event name as sent on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            PullRequestEvent::PullRequestOpened { .. } => "pull_request_opened",
            PullRequestEvent::PullRequestMerged { .. } => "pull_request_merged",
            PullRequestEvent::PullRequestClosed { .. } => "pull_request_closed",
            PullRequestEvent::MergeabilityChanged { .. } => "mergeability_changed",
            PullRequestEvent::ReviewSubmitted { .. } => "review_submitted",
        }
    }
}
