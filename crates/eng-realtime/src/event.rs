//! Real-time event types.

use crate::subscription::{Channel, ProjectFilter};
use eng_collaboration::PullRequestEvent;
use eng_types::unix_now;
use eng_vcs::RepoEvent;
use serde::{Deserialize, Serialize};

/// A real-time event that can be broadcast to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// Event type identifier.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Channel this event belongs to.
    pub channel: String,

    /// The underlying event kind.
    pub event: EventKind,

    /// Event payload data.
    pub data: serde_json::Value,

    /// Unix timestamp when the event occurred.
    pub timestamp: u64,

    /// Unique event ID.
    pub event_id: String,
}

impl RealtimeEvent {
    /// Create a new real-time event.
    pub fn new(channel: String, event: EventKind, data: serde_json::Value) -> Self {
        Self {
            event_type: "event".to_string(),
            channel,
            event,
            data,
            timestamp: unix_now(),
            event_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Specific event types for real-time updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // Repository events
    BranchCreated,
    BranchDeleted,
    BranchMerged,
    CommitCreated,
    TagCreated,
    TagDeleted,

    // Pull request events
    PullRequestOpened,
    PullRequestMerged,
    PullRequestClosed,
    MergeabilityChanged,
    ReviewSubmitted,

    // Session events
    /// A participant joined or re-attached.
    ParticipantJoined,
    /// A participant left or was evicted.
    ParticipantLeft,
    CursorMoved,
    ViewportChanged,
    MediaChanged,
    /// Session paused, resumed, activated or ended.
    SessionStatusChanged,
    /// Host or co-host assignment changed.
    RoleChanged,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::BranchCreated => "branch_created",
            EventKind::BranchDeleted => "branch_deleted",
            EventKind::BranchMerged => "branch_merged",
            EventKind::CommitCreated => "commit_created",
            EventKind::TagCreated => "tag_created",
            EventKind::TagDeleted => "tag_deleted",
            EventKind::PullRequestOpened => "pull_request_opened",
            EventKind::PullRequestMerged => "pull_request_merged",
            EventKind::PullRequestClosed => "pull_request_closed",
            EventKind::MergeabilityChanged => "mergeability_changed",
            EventKind::ReviewSubmitted => "review_submitted",
            EventKind::ParticipantJoined => "participant_joined",
            EventKind::ParticipantLeft => "participant_left",
            EventKind::CursorMoved => "cursor_moved",
            EventKind::ViewportChanged => "viewport_changed",
            EventKind::MediaChanged => "media_changed",
            EventKind::SessionStatusChanged => "session_status_changed",
            EventKind::RoleChanged => "role_changed",
        };
        write!(f, "{}", s)
    }
}

impl From<&RepoEvent> for RealtimeEvent {
    fn from(event: &RepoEvent) -> Self {
        let (kind, filter) = match event {
            RepoEvent::BranchCreated { .. } => (EventKind::BranchCreated, Some(ProjectFilter::Branches)),
            RepoEvent::BranchDeleted { .. } => (EventKind::BranchDeleted, Some(ProjectFilter::Branches)),
            RepoEvent::BranchMerged { .. } => (EventKind::BranchMerged, Some(ProjectFilter::Branches)),
            RepoEvent::CommitCreated { .. } => (EventKind::CommitCreated, Some(ProjectFilter::Branches)),
            RepoEvent::TagCreated { .. } => (EventKind::TagCreated, None),
            RepoEvent::TagDeleted { .. } => (EventKind::TagDeleted, None),
        };
        RealtimeEvent::new(
            Channel::project(event.project(), filter).to_string(),
            kind,
            serde_json::to_value(event).unwrap_or_default(),
        )
    }
}

impl From<&PullRequestEvent> for RealtimeEvent {
    fn from(event: &PullRequestEvent) -> Self {
        let kind = match event {
            PullRequestEvent::PullRequestOpened { .. } => EventKind::PullRequestOpened,
            PullRequestEvent::PullRequestMerged { .. } => EventKind::PullRequestMerged,
            PullRequestEvent::PullRequestClosed { .. } => EventKind::PullRequestClosed,
            PullRequestEvent::MergeabilityChanged { .. } => EventKind::MergeabilityChanged,
            PullRequestEvent::ReviewSubmitted { .. } => EventKind::ReviewSubmitted,
        };
        RealtimeEvent::new(
            Channel::project(event.project(), Some(ProjectFilter::Pulls)).to_string(),
            kind,
            serde_json::to_value(event).unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eng_types::ProjectId;

    fn project() -> ProjectId {
        ProjectId::parse("gearbox").unwrap()
    }

    #[test]
    fn test_event_kind_display_matches_serde() {
        for kind in [
            EventKind::CommitCreated,
            EventKind::MergeabilityChanged,
            EventKind::SessionStatusChanged,
        ] {
            assert_eq!(
                serde_json::to_string(&kind).unwrap(),
                format!("\"{}\"", kind)
            );
        }
    }

    #[test]
    fn test_repo_event_routing() {
        let tag = RepoEvent::TagDeleted {
            project: project(),
            name: "v1.0.0".into(),
        };
        let event = RealtimeEvent::from(&tag);
        assert_eq!(event.channel, "project:gearbox");
        assert_eq!(event.event, EventKind::TagDeleted);
        assert_eq!(event.data["name"], "v1.0.0");

        let deleted = RepoEvent::BranchDeleted {
            project: project(),
            branch_id: 2,
            name: "feature/x".into(),
        };
        let event = RealtimeEvent::from(&deleted);
        assert_eq!(event.channel, "project:gearbox/branches");
        assert_eq!(event.event.to_string(), deleted.name());
    }

    #[test]
    fn test_pull_request_event_routing() {
        let closed = PullRequestEvent::PullRequestClosed {
            project: project(),
            number: 4,
        };
        let event = RealtimeEvent::from(&closed);
        assert_eq!(event.channel, "project:gearbox/pulls");
        assert_eq!(event.event.to_string(), closed.name());
        assert_eq!(event.data["number"], 4);
    }

    #[test]
    fn test_event_serialization() {
        let event = RealtimeEvent::new(
            "session:s1".to_string(),
            EventKind::CursorMoved,
            serde_json::json!({"user": "alice"}),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"], "cursor_moved");
        assert!(!event.event_id.is_empty());
    }
}
