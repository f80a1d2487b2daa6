//! Pull request storage and orchestration.

use eng_types::{unix_now, ProjectId, UserId};
use eng_vcs::{Branch, BranchId, MergeMethod, MergeOptions, Repository, Resolution, VcsError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::pull_request::CheckedHeads;
use crate::{
    CollaborationError, NewPullRequest, PullRequest, PullRequestEvent, PullRequestState, Result,
    Review, ReviewState,
};

const EVENT_CAPACITY: usize = 256;

/// Each pull request carries its own lock so a slow merge only holds up
/// operations on that pull request.
type SharedPullRequest = Arc<Mutex<PullRequest>>;

/// In-memory store for pull requests and reviews.
///
/// Operations that depend on branch state take the project's [`Repository`].
/// Conflict lists are recomputed whenever either branch head has moved since
/// the last check, so `mergeable` is never trusted stale.
pub struct CollaborationStore {
    /// Pull requests indexed by (project, number).
    pull_requests: RwLock<HashMap<(ProjectId, u32), SharedPullRequest>>,
    /// Reviews indexed by id.
    reviews: RwLock<HashMap<u64, Review>>,
    /// Counter for next PR number per project.
    pr_counters: RwLock<HashMap<ProjectId, u32>>,
    /// Global ID counter for entities.
    next_id: AtomicU64,
    events: broadcast::Sender<PullRequestEvent>,
}

impl Default for CollaborationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CollaborationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaborationStore")
            .field("pull_requests", &self.pull_requests.read().len())
            .field("reviews", &self.reviews.read().len())
            .finish()
    }
}

fn active(branch: Branch) -> Result<Branch> {
    if branch.is_active() {
        Ok(branch)
    } else {
        Err(VcsError::BranchNotActive {
            branch: branch.name,
            status: branch.status.to_string(),
        }
        .into())
    }
}

/// Recomputes the conflict list if either head moved, or always when
/// `force` is set. Returns true if `mergeable` changed.
fn recheck(repo: &Repository, pr: &mut PullRequest, force: bool) -> Result<bool> {
    let source = repo.branch(pr.source_branch)?;
    let target = repo.branch(pr.target_branch)?;
    if !force && !pr.is_stale(source.head_commit_id, target.head_commit_id) {
        return Ok(false);
    }

    let check = repo.check_merge(pr.source_branch, pr.target_branch)?;
    debug!(
        project = %pr.project_id,
        number = pr.number,
        conflicts = check.conflicts.len(),
        "Recomputed pull request conflicts"
    );
    Ok(pr.apply_check(check))
}

impl CollaborationStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            pull_requests: RwLock::new(HashMap::new()),
            reviews: RwLock::new(HashMap::new()),
            pr_counters: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            events,
        }
    }

    /// Generates a new unique ID.
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Gets the next PR number for a project.
    fn next_pr_number(&self, project: &ProjectId) -> u32 {
        let mut counters = self.pr_counters.write();
        let counter = counters.entry(project.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Subscribes to pull request events.
    pub fn subscribe(&self) -> broadcast::Receiver<PullRequestEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: PullRequestEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn emit_mergeability(&self, pr: &PullRequest) {
        info!(
            project = %pr.project_id,
            number = pr.number,
            mergeable = pr.mergeable,
            "Pull request mergeability changed"
        );
        self.emit(PullRequestEvent::MergeabilityChanged {
            project: pr.project_id.clone(),
            number: pr.number,
            mergeable: pr.mergeable,
        });
    }

    // ==================== Pull Requests ====================

    /// Opens a pull request and computes its conflicts.
    pub fn create_pull_request(
        &self,
        repo: &Repository,
        author: UserId,
        new: NewPullRequest,
    ) -> Result<PullRequest> {
        let (title, source_name, target_name) = new.required()?;
        if source_name == target_name {
            return Err(CollaborationError::Validation(
                "source and target branch must differ".to_string(),
            ));
        }

        let source = active(repo.branch_by_name(source_name)?)?;
        let target = active(repo.branch_by_name(target_name)?)?;
        let check = repo.check_merge(source.id, target.id)?;

        let project = repo.project_id().clone();
        let now = unix_now();
        let mut pr = PullRequest {
            id: self.next_id(),
            project_id: project.clone(),
            number: 0,
            title: title.to_string(),
            description: new.description.clone().unwrap_or_default(),
            author,
            state: PullRequestState::Open,
            source_branch: source.id,
            source_branch_name: source.name,
            target_branch: target.id,
            target_branch_name: target.name,
            mergeable: true,
            conflicts: Vec::new(),
            reviewers: Vec::new(),
            checked: CheckedHeads {
                source: check.source_head,
                target: check.target_head,
                base: check.base,
            },
            created_at: now,
            updated_at: now,
            merged_at: None,
            merged_by: None,
            merge_commit: None,
            merge_method: None,
        };
        pr.apply_check(check);
        for reviewer in new.reviewers {
            pr.request_reviewer(reviewer);
        }
        pr.number = self.next_pr_number(&project);

        self.pull_requests
            .write()
            .insert((project.clone(), pr.number), Arc::new(Mutex::new(pr.clone())));

        info!(
            project = %project,
            number = pr.number,
            source = %pr.source_branch_name,
            target = %pr.target_branch_name,
            mergeable = pr.mergeable,
            "Opened pull request"
        );
        self.emit(PullRequestEvent::PullRequestOpened {
            project,
            number: pr.number,
            title: pr.title.clone(),
            author: pr.author.clone(),
            mergeable: pr.mergeable,
        });
        Ok(pr)
    }

    /// Gets a pull request by project and number.
    pub fn get_pull_request(&self, project: &ProjectId, number: u32) -> Result<PullRequest> {
        let pr = self.shared(project, number)?;
        let pr = pr.lock().clone();
        Ok(pr)
    }

    fn shared(&self, project: &ProjectId, number: u32) -> Result<SharedPullRequest> {
        let key = (project.clone(), number);
        self.pull_requests.read().get(&key).cloned().ok_or_else(|| {
            CollaborationError::PullRequestNotFound {
                project: project.to_string(),
                number,
            }
        })
    }

    /// Lists pull requests for a project, ordered by number.
    pub fn list_pull_requests(
        &self,
        project: &ProjectId,
        state: Option<PullRequestState>,
    ) -> Vec<PullRequest> {
        let shared: Vec<SharedPullRequest> = self
            .pull_requests
            .read()
            .iter()
            .filter(|((p, _), _)| p == project)
            .map(|(_, pr)| pr.clone())
            .collect();
        let mut prs: Vec<PullRequest> = shared
            .iter()
            .map(|pr| pr.lock().clone())
            .filter(|pr| state.is_none_or(|s| pr.state == s))
            .collect();
        prs.sort_by_key(|pr| pr.number);
        prs
    }

    /// Updates a pull request under its own lock. The store-wide map is
    /// only held long enough to find it.
    fn update_pull_request<F>(&self, project: &ProjectId, number: u32, f: F) -> Result<PullRequest>
    where
        F: FnOnce(&mut PullRequest) -> Result<()>,
    {
        let shared = self.shared(project, number)?;
        let mut pr = shared.lock();
        f(&mut *pr)?;
        Ok(pr.clone())
    }

    /// Recomputes conflicts if either branch moved since the last check.
    pub fn refresh(&self, repo: &Repository, number: u32) -> Result<PullRequest> {
        let mut changed = false;
        let pr = self.update_pull_request(repo.project_id(), number, |pr| {
            if pr.is_open() {
                changed = recheck(repo, pr, false)?;
            }
            Ok(())
        })?;
        if changed {
            self.emit_mergeability(&pr);
        }
        Ok(pr)
    }

    /// Refreshes every open pull request that has `branch` as source or
    /// target. Failures are logged and skipped.
    pub fn on_branch_updated(&self, repo: &Repository, branch: BranchId) -> Vec<PullRequest> {
        let numbers: Vec<u32> = self
            .list_pull_requests(repo.project_id(), Some(PullRequestState::Open))
            .into_iter()
            .filter(|pr| pr.source_branch == branch || pr.target_branch == branch)
            .map(|pr| pr.number)
            .collect();

        numbers
            .into_iter()
            .filter_map(|number| match self.refresh(repo, number) {
                Ok(pr) => Some(pr),
                Err(e) => {
                    warn!(
                        project = %repo.project_id(),
                        number,
                        error = %e,
                        "Failed to refresh pull request"
                    );
                    None
                }
            })
            .collect()
    }

    /// Records a resolution for one conflicting path.
    ///
    /// Conflicts are refreshed first so the resolution applies to the
    /// current divergence.
    pub fn resolve_conflict(
        &self,
        repo: &Repository,
        number: u32,
        path: &str,
        resolution: Resolution,
    ) -> Result<PullRequest> {
        if let Resolution::Content(id) = resolution {
            if !repo.store().contains(&id).map_err(VcsError::from)? {
                return Err(CollaborationError::Validation(format!(
                    "resolution content {} is not stored",
                    id.short()
                )));
            }
        }

        let mut changed = false;
        let pr = self.update_pull_request(repo.project_id(), number, |pr| {
            pr.ensure_open()?;
            changed = recheck(repo, pr, false)?;
            changed ^= pr.resolve_conflict(path, resolution)?;
            Ok(())
        })?;

        info!(project = %pr.project_id, number, path, "Resolved conflict");
        if changed {
            self.emit_mergeability(&pr);
        }
        Ok(pr)
    }

    /// Closes a pull request without merging.
    pub fn close_pull_request(&self, project: &ProjectId, number: u32) -> Result<PullRequest> {
        let pr = self.update_pull_request(project, number, |pr| pr.close())?;
        info!(project = %project, number, "Closed pull request");
        self.emit(PullRequestEvent::PullRequestClosed {
            project: project.clone(),
            number,
        });
        Ok(pr)
    }

    /// Merges a pull request into its target branch.
    ///
    /// The conflict list is recomputed first if either branch moved. The
    /// merge is rejected while conflicts remain unresolved or the target
    /// branch lacks its required approvals. It runs against the heads the
    /// conflicts were computed for; if either moves before the merge lands
    /// the merge fails with [`VcsError::ConcurrentModification`].
    pub fn merge_pull_request(
        &self,
        repo: &Repository,
        number: u32,
        merged_by: UserId,
        method: MergeMethod,
    ) -> Result<PullRequest> {
        let project = repo.project_id().clone();
        self.refresh(repo, number)?;

        let pr = self.update_pull_request(&project, number, |pr| {
            pr.ensure_open()?;
            // Heads may have moved again since the refresh above.
            recheck(repo, pr, false)?;
            if !pr.mergeable {
                return Err(CollaborationError::HasConflicts {
                    number,
                    paths: pr.unresolved_paths(),
                });
            }

            let target = repo.branch(pr.target_branch)?;
            let approvals = pr.approvals();
            if !target.protection_rules.check_approvals(approvals) {
                return Err(CollaborationError::InsufficientApprovals {
                    required: target.protection_rules.required_approvals,
                    actual: approvals,
                });
            }

            let options = MergeOptions {
                author: merged_by.clone(),
                method,
                message: Some(format!(
                    "Merge pull request #{} from {}\n\n{}",
                    pr.number, pr.source_branch_name, pr.title
                )),
                resolutions: pr.resolutions(),
                via_pull_request: true,
                expected_source_head: Some(pr.checked.source),
                expected_target_head: Some(pr.checked.target),
            };
            let commit = repo.merge_branch(pr.source_branch, pr.target_branch, options)?;
            pr.merge(merged_by.clone(), commit.id, method)
        })?;

        info!(
            project = %project,
            number,
            merged_by = %merged_by,
            method = ?method,
            "Merged pull request"
        );
        if let Some(commit) = pr.merge_commit {
            self.emit(PullRequestEvent::PullRequestMerged {
                project,
                number,
                merged_by,
                commit,
            });
        }
        Ok(pr)
    }

    // ==================== Reviews ====================

    /// Asks a user to review a pull request.
    pub fn request_review(
        &self,
        project: &ProjectId,
        number: u32,
        reviewer: UserId,
    ) -> Result<PullRequest> {
        self.update_pull_request(project, number, |pr| {
            pr.ensure_open()?;
            pr.request_reviewer(reviewer);
            Ok(())
        })
    }

    /// Submits a review against the current source head.
    pub fn submit_review(
        &self,
        repo: &Repository,
        number: u32,
        author: UserId,
        state: ReviewState,
        body: Option<String>,
    ) -> Result<Review> {
        if state == ReviewState::Dismissed {
            return Err(CollaborationError::Validation(
                "a review cannot be submitted as dismissed".to_string(),
            ));
        }

        let project = repo.project_id().clone();
        let id = self.next_id();
        let mut review = None;
        self.update_pull_request(&project, number, |pr| {
            pr.ensure_open()?;
            let head = repo.branch(pr.source_branch)?.head_commit_id;
            let mut submitted =
                Review::new(id, project.clone(), number, author.clone(), state, head);
            submitted.body = body;
            pr.record_review(&author, state);
            review = Some(submitted);
            Ok(())
        })?;
        let review = review.ok_or(CollaborationError::ReviewNotFound { id })?;

        self.reviews.write().insert(review.id, review.clone());
        info!(project = %project, number, reviewer = %author, state = %state, "Review submitted");
        self.emit(PullRequestEvent::ReviewSubmitted {
            project,
            number,
            reviewer: author,
            state,
        });
        Ok(review)
    }

    /// Gets a review by ID.
    pub fn get_review(&self, id: u64) -> Result<Review> {
        self.reviews
            .read()
            .get(&id)
            .cloned()
            .ok_or(CollaborationError::ReviewNotFound { id })
    }

    /// Lists reviews for a pull request in submission order.
    pub fn list_reviews(&self, project: &ProjectId, number: u32) -> Vec<Review> {
        let mut reviews: Vec<Review> = self
            .reviews
            .read()
            .values()
            .filter(|r| &r.project_id == project && r.pr_number == number)
            .cloned()
            .collect();
        reviews.sort_by_key(|r| r.id);
        reviews
    }

    /// Dismisses a review. If it was the reviewer's latest, their approval
    /// no longer counts.
    pub fn dismiss_review(&self, id: u64) -> Result<Review> {
        let review = {
            let mut reviews = self.reviews.write();
            let review = reviews
                .get_mut(&id)
                .ok_or(CollaborationError::ReviewNotFound { id })?;
            review.dismiss();
            review.clone()
        };

        let latest = self
            .list_reviews(&review.project_id, review.pr_number)
            .into_iter()
            .filter(|r| r.author == review.author)
            .map(|r| r.id)
            .max();
        if latest == Some(id) {
            self.update_pull_request(&review.project_id, review.pr_number, |pr| {
                pr.record_review(&review.author, ReviewState::Dismissed);
                Ok(())
            })?;
        }
        info!(project = %review.project_id, number = review.pr_number, review = id, "Review dismissed");
        Ok(review)
    }
}
