//! Pull request orchestration for eng.com.
//!
//! A pull request proposes merging one branch of a project into another. The
//! store tracks reviews and the conflict list between the two branches,
//! recomputing it whenever either head moves, and hands the final merge to
//! [`eng_vcs::Repository::merge_branch`].

mod error;
mod event;
mod pull_request;
mod review;
mod store;

pub use error::CollaborationError;
pub use event::PullRequestEvent;
pub use pull_request::{CheckedHeads, NewPullRequest, PullRequest, PullRequestState};
pub use review::{Review, ReviewState, Reviewer, ReviewerStatus};
pub use store::CollaborationStore;

/// Result type for collaboration operations.
pub type Result<T> = std::result::Result<T, CollaborationError>;
