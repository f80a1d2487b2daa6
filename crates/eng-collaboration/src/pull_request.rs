//! Pull Request types and state management.

use eng_storage::ContentId;
use eng_types::{unix_now, ProjectId, UserId};
use eng_vcs::{BranchId, ConflictStatus, MergeCheck, MergeConflict, MergeMethod, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{CollaborationError, ReviewState, Reviewer, ReviewerStatus, Result};

/// State of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    /// Pull request is open and can be reviewed/merged.
    Open,
    /// Pull request was closed without merging.
    Closed,
    /// Pull request was merged into the target branch.
    Merged,
}

impl std::fmt::Display for PullRequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PullRequestState::Open => write!(f, "open"),
            PullRequestState::Closed => write!(f, "closed"),
            PullRequestState::Merged => write!(f, "merged"),
        }
    }
}

/// Branch heads a conflict list was computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckedHeads {
    pub source: ContentId,
    pub target: ContentId,
    pub base: ContentId,
}

/// A proposal to merge one branch into another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Unique identifier within the store.
    pub id: u64,
    /// Owning project.
    pub project_id: ProjectId,
    /// Pull request number within the project (#1, #2, etc.).
    pub number: u32,
    /// Title of the pull request.
    pub title: String,
    /// Description/body of the pull request (Markdown).
    pub description: String,
    /// Author.
    pub author: UserId,
    /// Current state of the pull request.
    pub state: PullRequestState,
    /// Source branch.
    pub source_branch: BranchId,
    /// Source branch name at creation.
    pub source_branch_name: String,
    /// Target branch.
    pub target_branch: BranchId,
    /// Target branch name at creation.
    pub target_branch_name: String,
    /// Whether the branches merge cleanly, counting recorded resolutions.
    pub mergeable: bool,
    /// Conflicts from the latest check.
    pub conflicts: Vec<MergeConflict>,
    /// Requested and submitted reviewers.
    pub reviewers: Vec<Reviewer>,
    /// Heads the conflict list was computed against.
    pub checked: CheckedHeads,
    /// Unix timestamp when the PR was created.
    pub created_at: u64,
    /// Unix timestamp when the PR was last updated.
    pub updated_at: u64,
    /// Unix timestamp when the PR was merged (if merged).
    pub merged_at: Option<u64>,
    /// User who merged the PR (if merged).
    pub merged_by: Option<UserId>,
    /// Commit the target pointed at after the merge.
    pub merge_commit: Option<ContentId>,
    /// Method used for the merge.
    pub merge_method: Option<MergeMethod>,
}

/// Fields needed to open a pull request. Absent or blank fields are reported
/// together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPullRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source_branch: Option<String>,
    #[serde(default)]
    pub target_branch: Option<String>,
    #[serde(default)]
    pub reviewers: Vec<UserId>,
}

impl NewPullRequest {
    /// Convenience constructor with all required fields.
    pub fn new(
        title: impl Into<String>,
        source_branch: impl Into<String>,
        target_branch: impl Into<String>,
    ) -> Self {
        Self {
            title: Some(title.into()),
            description: None,
            source_branch: Some(source_branch.into()),
            target_branch: Some(target_branch.into()),
            reviewers: Vec::new(),
        }
    }

    /// Returns `(title, source, target)` or every missing field.
    pub(crate) fn required(&self) -> Result<(&str, &str, &str)> {
        fn present(value: &Option<String>) -> Option<&str> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
        }
        let title = present(&self.title);
        let source = present(&self.source_branch);
        let target = present(&self.target_branch);

        match (title, source, target) {
            (Some(t), Some(s), Some(g)) => Ok((t, s, g)),
            _ => {
                let mut fields = Vec::new();
                if title.is_none() {
                    fields.push("title");
                }
                if source.is_none() {
                    fields.push("source_branch");
                }
                if target.is_none() {
                    fields.push("target_branch");
                }
                Err(CollaborationError::MissingFields { fields })
            }
        }
    }
}

impl PullRequest {
    /// Returns true if the pull request is open.
    pub fn is_open(&self) -> bool {
        self.state == PullRequestState::Open
    }

    /// Returns true if the pull request is merged.
    pub fn is_merged(&self) -> bool {
        self.state == PullRequestState::Merged
    }

    /// Returns true if the pull request is closed (not merged).
    pub fn is_closed(&self) -> bool {
        self.state == PullRequestState::Closed
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CollaborationError::NotOpen {
                project: self.project_id.to_string(),
                number: self.number,
                state: self.state.to_string(),
            })
        }
    }

    fn touch(&mut self) {
        self.updated_at = unix_now();
    }

    /// Closes the pull request without merging. Closed is terminal.
    pub fn close(&mut self) -> Result<()> {
        if self.state != PullRequestState::Open {
            return Err(CollaborationError::InvalidStateTransition {
                action: "close".to_string(),
                current_state: self.state.to_string(),
            });
        }

        self.state = PullRequestState::Closed;
        self.touch();
        Ok(())
    }

    /// Marks the pull request merged.
    pub fn merge(&mut self, merged_by: UserId, commit: ContentId, method: MergeMethod) -> Result<()> {
        if self.state != PullRequestState::Open {
            return Err(CollaborationError::InvalidStateTransition {
                action: "merge".to_string(),
                current_state: self.state.to_string(),
            });
        }

        let now = unix_now();
        self.state = PullRequestState::Merged;
        self.merged_at = Some(now);
        self.merged_by = Some(merged_by);
        self.merge_commit = Some(commit);
        self.merge_method = Some(method);
        self.updated_at = now;
        Ok(())
    }

    /// Returns true if either branch moved since the last conflict check.
    pub fn is_stale(&self, source_head: ContentId, target_head: ContentId) -> bool {
        self.checked.source != source_head || self.checked.target != target_head
    }

    /// Replaces the conflict list with a fresh check.
    ///
    /// A recorded resolution survives only if the same path still conflicts
    /// with identical markers. Returns true if `mergeable` changed.
    pub fn apply_check(&mut self, check: MergeCheck) -> bool {
        let previous = std::mem::take(&mut self.conflicts);
        self.conflicts = check
            .conflicts
            .into_iter()
            .map(|mut fresh| {
                let carried = previous
                    .iter()
                    .find(|old| old.is_resolved() && old.same_divergence(&fresh))
                    .and_then(|old| old.resolution);
                if let Some(resolution) = carried {
                    fresh.resolve(resolution);
                }
                fresh
            })
            .collect();
        self.checked = CheckedHeads {
            source: check.source_head,
            target: check.target_head,
            base: check.base,
        };
        self.touch();
        self.update_mergeable()
    }

    fn update_mergeable(&mut self) -> bool {
        let mergeable = self.conflicts.iter().all(|c| c.is_resolved());
        let changed = mergeable != self.mergeable;
        self.mergeable = mergeable;
        changed
    }

    /// Paths whose conflicts still need a decision.
    pub fn unresolved_paths(&self) -> Vec<String> {
        self.conflicts
            .iter()
            .filter(|c| c.status == ConflictStatus::Unresolved)
            .map(|c| c.file_path.clone())
            .collect()
    }

    /// Records a resolution for a conflicting path. Returns true if
    /// `mergeable` changed.
    pub fn resolve_conflict(&mut self, path: &str, resolution: Resolution) -> Result<bool> {
        let conflict = self
            .conflicts
            .iter_mut()
            .find(|c| c.file_path == path)
            .ok_or_else(|| CollaborationError::ConflictNotFound {
                number: self.number,
                path: path.to_string(),
            })?;
        conflict.resolve(resolution);
        self.touch();
        Ok(self.update_mergeable())
    }

    /// Resolutions keyed by path, for handing to the merge.
    pub fn resolutions(&self) -> BTreeMap<String, Resolution> {
        self.conflicts
            .iter()
            .filter_map(|c| c.resolution.map(|r| (c.file_path.clone(), r)))
            .collect()
    }

    /// Adds a requested reviewer if not already present.
    pub fn request_reviewer(&mut self, user: UserId) {
        if !self.reviewers.iter().any(|r| r.user == user) {
            self.reviewers.push(Reviewer::requested(user));
            self.touch();
        }
    }

    /// Records a submitted review against the reviewer list.
    pub fn record_review(&mut self, user: &UserId, state: ReviewState) {
        match self.reviewers.iter_mut().find(|r| &r.user == user) {
            Some(reviewer) => {
                reviewer.status = ReviewerStatus::Submitted;
                reviewer.latest = Some(state);
            }
            None => self.reviewers.push(Reviewer {
                user: user.clone(),
                status: ReviewerStatus::Submitted,
                latest: Some(state),
            }),
        }
        self.touch();
    }

    /// Number of reviewers whose current stance is an approval.
    pub fn approvals(&self) -> u32 {
        self.reviewers.iter().filter(|r| r.approves()).count() as u32
    }
}
