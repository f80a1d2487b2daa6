//! Pull request flows against a real repository.

use eng_collaboration::{
    CollaborationError, CollaborationStore, NewPullRequest, PullRequestEvent, PullRequestState,
    ReviewState,
};
use eng_storage::ObjectStore;
use eng_types::{ProjectId, UserId};
use eng_vcs::{
    BranchStatus, Change, CommitRequest, ConflictKind, MergeMethod, MergeStrategy, Repository,
    RepositoryOptions, Resolution,
};

fn user(name: &str) -> UserId {
    UserId::parse(name).unwrap()
}

fn part(line5: &str) -> String {
    format!("l1\nl2\nl3\nl4\n{line5}\nl6\nl7\n")
}

fn repo_with(strategy: MergeStrategy) -> Repository {
    let options = RepositoryOptions {
        merge_strategy: strategy,
        ..Default::default()
    };
    let repo = Repository::init(
        ProjectId::parse("gearbox").unwrap(),
        ObjectStore::in_memory(),
        options,
        user("alice"),
    )
    .unwrap();
    let main = repo.default_branch().unwrap();
    repo.create_commit(
        main.id,
        CommitRequest::new(user("alice"), "Add part", vec![Change::put("part.cad", part("l5"))]),
    )
    .unwrap();
    repo
}

fn edit(repo: &Repository, branch: &str, content: String) {
    let branch = repo.branch_by_name(branch).unwrap();
    repo.create_commit(
        branch.id,
        CommitRequest::new(user("bob"), "Edit part", vec![Change::put("part.cad", content)]),
    )
    .unwrap();
}

#[test]
fn test_diverging_line_five_blocks_merge() {
    for strategy in [MergeStrategy::Path, MergeStrategy::Line] {
        let repo = repo_with(strategy);
        let main = repo.default_branch().unwrap();
        repo.create_branch("feature/a", main.id, None).unwrap();
        repo.create_branch("feature/b", main.id, None).unwrap();
        edit(&repo, "feature/a", part("bore 10mm"));
        edit(&repo, "feature/b", part("bore 12mm"));

        // Land feature/a so feature/b diverges from main on line 5.
        let store = CollaborationStore::new();
        let first = store
            .create_pull_request(&repo, user("bob"), NewPullRequest::new("A", "feature/a", "main"))
            .unwrap();
        assert!(first.mergeable);
        store
            .merge_pull_request(&repo, first.number, user("alice"), MergeMethod::Merge)
            .unwrap();

        let pr = store
            .create_pull_request(&repo, user("bob"), NewPullRequest::new("B", "feature/b", "main"))
            .unwrap();
        assert!(!pr.mergeable, "{strategy:?}");
        assert_eq!(pr.conflicts.len(), 1);
        assert_eq!(pr.conflicts[0].file_path, "part.cad");
        assert_eq!(pr.conflicts[0].kind, ConflictKind::Content);
        assert!(pr.conflicts[0].conflict_markers.contains("<<<<<<< main"));
        assert!(pr.conflicts[0].conflict_markers.contains(">>>>>>> feature/b"));
    }
}

#[test]
fn test_full_review_and_rebase_flow() {
    let repo = repo_with(MergeStrategy::Path);
    let main = repo.default_branch().unwrap();
    let feature = repo.create_branch("feature/rib", main.id, None).unwrap();
    edit(&repo, "feature/rib", part("rib"));
    edit(&repo, "feature/rib", part("rib 2"));
    repo.create_commit(
        main.id,
        CommitRequest::new(user("alice"), "Add notes", vec![Change::put("notes.md", "hi\n")]),
    )
    .unwrap();

    let store = CollaborationStore::new();
    let mut events = store.subscribe();
    let pr = store
        .create_pull_request(
            &repo,
            user("bob"),
            NewPullRequest {
                reviewers: vec![user("carol")],
                ..NewPullRequest::new("Add rib", "feature/rib", "main")
            },
        )
        .unwrap();
    assert_eq!(pr.reviewers.len(), 1);
    assert!(matches!(
        events.try_recv().unwrap(),
        PullRequestEvent::PullRequestOpened { number: 1, mergeable: true, .. }
    ));

    store
        .submit_review(&repo, pr.number, user("carol"), ReviewState::Approved, Some("ok".into()))
        .unwrap();
    assert_eq!(store.list_reviews(repo.project_id(), pr.number).len(), 1);

    let merged = store
        .merge_pull_request(&repo, pr.number, user("alice"), MergeMethod::Rebase)
        .unwrap();
    assert_eq!(merged.state, PullRequestState::Merged);
    assert_eq!(repo.branch(feature.id).unwrap().status, BranchStatus::Merged);

    // Two replayed commits on top of "Add notes", all single-parent.
    let history = repo.get_history(main.id, 3, 0).unwrap();
    assert!(history.iter().all(|c| c.parents.len() == 1));
    assert_eq!(history[2].message, "Add notes");
    assert_eq!(Some(history[0].id), merged.merge_commit);

    let kinds: Vec<&str> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.name())
        .collect();
    assert_eq!(kinds, vec!["review_submitted", "pull_request_merged"]);
}

#[test]
fn test_resolution_dropped_when_conflict_changes() {
    let repo = repo_with(MergeStrategy::Path);
    let main = repo.default_branch().unwrap();
    repo.create_branch("feature/x", main.id, None).unwrap();
    edit(&repo, "feature/x", part("source"));
    edit(&repo, "main", part("target"));

    let store = CollaborationStore::new();
    let pr = store
        .create_pull_request(&repo, user("bob"), NewPullRequest::new("X", "feature/x", "main"))
        .unwrap();
    let pr = store
        .resolve_conflict(&repo, pr.number, "part.cad", Resolution::Delete)
        .unwrap();
    assert!(pr.mergeable);

    // Target changes the same file again; the old decision no longer applies.
    edit(&repo, "main", part("target 2"));
    let err = store
        .merge_pull_request(&repo, pr.number, user("alice"), MergeMethod::Merge)
        .unwrap_err();
    match err {
        CollaborationError::HasConflicts { paths, .. } => assert_eq!(paths, vec!["part.cad"]),
        other => panic!("expected conflicts, got {other:?}"),
    }
}

#[test]
fn test_closed_and_merged_are_not_open() {
    let repo = repo_with(MergeStrategy::Path);
    let main = repo.default_branch().unwrap();
    repo.create_branch("feature/y", main.id, None).unwrap();
    edit(&repo, "feature/y", part("y"));

    let store = CollaborationStore::new();
    let pr = store
        .create_pull_request(&repo, user("bob"), NewPullRequest::new("Y", "feature/y", "main"))
        .unwrap();
    store.close_pull_request(repo.project_id(), pr.number).unwrap();

    let err = store
        .merge_pull_request(&repo, pr.number, user("alice"), MergeMethod::Merge)
        .unwrap_err();
    assert!(matches!(err, CollaborationError::NotOpen { .. }));
    assert!(store.close_pull_request(repo.project_id(), pr.number).is_err());

    assert_eq!(
        store
            .list_pull_requests(repo.project_id(), Some(PullRequestState::Closed))
            .len(),
        1
    );
    assert!(store
        .list_pull_requests(repo.project_id(), Some(PullRequestState::Open))
        .is_empty());
}
