//! Background tasks that bridge domain events onto the realtime hub.
//!
//! Each repository's [`RepoEvent`]s and the collaboration store's
//! [`PullRequestEvent`]s are republished as [`RealtimeEvent`]s. Branch
//! movements also trigger a conflict recheck of the pull requests touching
//! the moved branch.

use eng_collaboration::PullRequestEvent;
use eng_realtime::RealtimeEvent;
use eng_vcs::{RepoEvent, Repository};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::AppState;

/// Forwards one repository's events for as long as the node runs.
pub fn forward_repository(state: &AppState, repo: Arc<Repository>) -> JoinHandle<()> {
    let mut events = repo.subscribe();
    let state = state.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    state.realtime.emit(RealtimeEvent::from(&event));
                    recheck_pull_requests(&state, &repo, &event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(project = %repo.project_id(), skipped, "Repository event stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!(project = %repo.project_id(), "Repository forwarder stopped");
    })
}

fn recheck_pull_requests(state: &AppState, repo: &Repository, event: &RepoEvent) {
    let moved = match event {
        RepoEvent::CommitCreated { branch_id, .. } => *branch_id,
        RepoEvent::BranchMerged { target_id, .. } => *target_id,
        _ => return,
    };
    let updated = state.collaboration.on_branch_updated(repo, moved);
    if !updated.is_empty() {
        debug!(
            project = %repo.project_id(),
            branch = moved,
            pull_requests = updated.len(),
            "Rechecked pull requests"
        );
    }
}

/// Forwards pull request events for every project.
pub fn forward_pull_requests(state: &AppState) -> JoinHandle<()> {
    let mut events = state.collaboration.subscribe();
    let hub = state.realtime.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => hub.emit(RealtimeEvent::from(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Pull request event stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Starts every background task: event forwarding for loaded projects and
/// pull requests, and the session heartbeat reaper.
pub fn spawn_background(state: &AppState) -> Vec<JoinHandle<()>> {
    let mut tasks = vec![forward_pull_requests(state), state.sessions.spawn_reaper()];
    for repo in state.projects.all() {
        tasks.push(forward_repository(state, repo));
    }
    info!(tasks = tasks.len(), "Background tasks started");
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use eng_collaboration::NewPullRequest;
    use eng_types::{ProjectId, UserId};
    use eng_vcs::{Change, CommitRequest};
    use std::time::Duration;

    fn user(name: &str) -> UserId {
        UserId::parse(name).unwrap()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_commit_rechecks_open_pull_requests() {
        let state = AppState::in_memory();
        let repo = state
            .projects
            .create(ProjectId::parse("gearbox").unwrap(), user("alice"))
            .unwrap();
        forward_repository(&state, repo.clone());

        let main = repo.default_branch().unwrap();
        repo.create_commit(
            main.id,
            CommitRequest::new(user("alice"), "Base", vec![Change::put("spec.txt", "a\nb\nc\n")]),
        )
        .unwrap();
        let feature = repo.create_branch("feature/bore", main.id, None).unwrap();
        repo.create_commit(
            feature.id,
            CommitRequest::new(user("bob"), "Edit", vec![Change::put("spec.txt", "a\nB\nc\n")]),
        )
        .unwrap();

        let pr = state
            .collaboration
            .create_pull_request(
                &repo,
                user("bob"),
                NewPullRequest::new("Widen bore", "feature/bore", "main"),
            )
            .unwrap();
        assert!(pr.mergeable);

        let mut pr_events = state.collaboration.subscribe();
        repo.create_commit(
            main.id,
            CommitRequest::new(user("alice"), "Clash", vec![Change::put("spec.txt", "a\nX\nc\n")]),
        )
        .unwrap();
        settle().await;

        let pr = state
            .collaboration
            .get_pull_request(repo.project_id(), pr.number)
            .unwrap();
        assert!(!pr.mergeable);
        assert!(matches!(
            pr_events.try_recv(),
            Ok(PullRequestEvent::MergeabilityChanged {
                mergeable: false,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_pull_request_events_reach_hub() {
        let state = AppState::in_memory();
        let repo = state
            .projects
            .create(ProjectId::parse("gearbox").unwrap(), user("alice"))
            .unwrap();
        forward_pull_requests(&state);
        let mut hub_events = state.realtime.subscribe_events();

        let main = repo.default_branch().unwrap();
        repo.create_branch("feature/bore", main.id, None).unwrap();
        state
            .collaboration
            .create_pull_request(
                &repo,
                user("bob"),
                NewPullRequest::new("Widen bore", "feature/bore", "main"),
            )
            .unwrap();
        settle().await;

        let event = hub_events.try_recv().unwrap();
        assert_eq!(event.channel, "project:gearbox/pulls");
    }
}
