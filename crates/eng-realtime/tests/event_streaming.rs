//! Repository and pull request events reaching hub subscribers, and
//! sessions surviving a dropped connection.

use eng_collaboration::{CollaborationStore, NewPullRequest};
use eng_realtime::{
    ClientCommand, ClientReceiver, CoordinatorConfig, CursorPosition, EventHub, NewSession,
    RealtimeEvent, SessionCoordinator,
};
use eng_storage::ObjectStore;
use eng_types::{ProjectId, UserId};
use eng_vcs::{Change, CommitRequest, Repository, RepositoryOptions};
use std::sync::Arc;

fn user(name: &str) -> UserId {
    UserId::parse(name).unwrap()
}

fn events(rx: &mut ClientReceiver) -> Vec<String> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .map(|m| {
            let value: serde_json::Value = serde_json::from_str(&m).unwrap();
            value["event"].as_str().unwrap_or("").to_string()
        })
        .filter(|e| !e.is_empty())
        .collect()
}

fn subscribe(hub: &EventHub, rx_client: &Arc<eng_realtime::Client>, channel: &str) {
    hub.handle_command(
        rx_client,
        ClientCommand::Subscribe {
            channel: channel.to_string(),
        },
    )
    .unwrap();
}

#[tokio::test]
async fn test_repository_events_reach_subscribers() {
    let hub = EventHub::new();
    let repo = Repository::init(
        ProjectId::parse("gearbox").unwrap(),
        ObjectStore::in_memory(),
        RepositoryOptions::default(),
        user("alice"),
    )
    .unwrap();
    let store = CollaborationStore::new();
    let mut repo_events = repo.subscribe();
    let mut pr_events = store.subscribe();

    let (branches, mut branches_rx) = hub.connect(None).unwrap();
    let (pulls, mut pulls_rx) = hub.connect(None).unwrap();
    let (everything, mut everything_rx) = hub.connect(None).unwrap();
    subscribe(&hub, &branches, "project:gearbox/branches");
    subscribe(&hub, &pulls, "project:gearbox/pulls");
    subscribe(&hub, &everything, "project:gearbox");

    let main = repo.default_branch().unwrap();
    let feature = repo.create_branch("feature/bore", main.id, None).unwrap();
    repo.create_commit(
        feature.id,
        CommitRequest::new(user("bob"), "Bore", vec![Change::put("part.cad", "bore\n")]),
    )
    .unwrap();
    store
        .create_pull_request(&repo, user("bob"), NewPullRequest::new("Bore", "feature/bore", "main"))
        .unwrap();

    while let Ok(event) = repo_events.try_recv() {
        hub.emit(RealtimeEvent::from(&event));
    }
    while let Ok(event) = pr_events.try_recv() {
        hub.emit(RealtimeEvent::from(&event));
    }

    assert_eq!(events(&mut branches_rx), vec!["branch_created", "commit_created"]);
    assert_eq!(events(&mut pulls_rx), vec!["pull_request_opened"]);
    assert_eq!(
        events(&mut everything_rx),
        vec!["branch_created", "commit_created", "pull_request_opened"]
    );
}

#[tokio::test]
async fn test_participant_reattaches_after_drop() {
    let hub = Arc::new(EventHub::new());
    let sessions = SessionCoordinator::new(hub.clone(), CoordinatorConfig::default());
    let session = sessions
        .create_session(NewSession {
            project_id: ProjectId::parse("gearbox").unwrap(),
            host: user("alice"),
            title: None,
            max_participants: Some(2),
            viewport_follows_host: false,
        })
        .unwrap();

    let (host, mut host_rx) = hub.connect(Some(user("alice"))).unwrap();
    sessions
        .join_session(&session.id, user("alice"), Some(&host.id))
        .unwrap();
    let (first, _first_rx) = hub.connect(Some(user("bob"))).unwrap();
    sessions
        .join_session(&session.id, user("bob"), Some(&first.id))
        .unwrap();

    // Bob's socket drops and comes back on a new connection.
    sessions.detach(&session.id, &user("bob"), &first.id);
    hub.disconnect(&first.id);
    let (second, mut second_rx) = hub.connect(Some(user("bob"))).unwrap();
    let rejoined = sessions
        .join_session(&session.id, user("bob"), Some(&second.id))
        .unwrap();
    assert_eq!(rejoined.participants.len(), 2);
    assert_eq!(
        rejoined.participant(&user("bob")).unwrap().client(),
        Some(&second.id)
    );
    events(&mut host_rx);

    let cursor = CursorPosition {
        x: 4.0,
        y: 2.0,
        z: 0.0,
        file_path: None,
    };
    sessions
        .update_cursor(&session.id, &user("alice"), 1, cursor)
        .unwrap();
    assert_eq!(events(&mut second_rx), vec!["cursor_moved"]);
    assert!(events(&mut host_rx).is_empty());
}
