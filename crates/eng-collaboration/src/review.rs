//! Reviews and reviewer bookkeeping.

use eng_storage::ContentId;
use eng_types::{unix_now, ProjectId, UserId};
use serde::{Deserialize, Serialize};

/// State of a code review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    /// Counts toward `required_approvals`.
    Approved,
    ChangesRequested,
    /// Feedback only.
    Commented,
    /// Withdrawn by a maintainer; no longer counts.
    Dismissed,
}

impl std::fmt::Display for ReviewState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewState::Approved => write!(f, "approved"),
            ReviewState::ChangesRequested => write!(f, "changes_requested"),
            ReviewState::Commented => write!(f, "commented"),
            ReviewState::Dismissed => write!(f, "dismissed"),
        }
    }
}

/// A review submitted against a pull request's source head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: u64,
    pub project_id: ProjectId,
    pub pr_number: u32,
    pub author: UserId,
    pub state: ReviewState,
    /// Markdown summary.
    pub body: Option<String>,
    /// Source head that was reviewed.
    pub commit_id: ContentId,
    /// Unix seconds.
    pub created_at: u64,
}

impl Review {
    pub fn new(
        id: u64,
        project_id: ProjectId,
        pr_number: u32,
        author: UserId,
        state: ReviewState,
        commit_id: ContentId,
    ) -> Self {
        Self {
            id,
            project_id,
            pr_number,
            author,
            state,
            body: None,
            commit_id,
            created_at: unix_now(),
        }
    }

    /// Attaches a summary.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn is_approved(&self) -> bool {
        self.state == ReviewState::Approved
    }

    pub fn is_dismissed(&self) -> bool {
        self.state == ReviewState::Dismissed
    }

    /// Marks the review dismissed. Reviewer standing is updated by the store.
    pub fn dismiss(&mut self) {
        self.state = ReviewState::Dismissed;
    }
}

/// Whether a reviewer has responded yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerStatus {
    /// Review requested, nothing submitted.
    Requested,
    /// At least one review submitted.
    Submitted,
}

/// A user asked to review, or who reviewed, a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    pub user: UserId,
    pub status: ReviewerStatus,
    /// State of the reviewer's most recent review.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<ReviewState>,
}

impl Reviewer {
    /// A reviewer who has been asked but has not responded.
    pub fn requested(user: UserId) -> Self {
        Self {
            user,
            status: ReviewerStatus::Requested,
            latest: None,
        }
    }

    /// Returns true if the reviewer's current stance is an approval.
    pub fn approves(&self) -> bool {
        self.latest == Some(ReviewState::Approved)
    }
}
