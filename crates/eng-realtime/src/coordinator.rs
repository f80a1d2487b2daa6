//! Collaboration session coordinator.

use crate::error::RealtimeError;
use crate::event::{EventKind, RealtimeEvent};
use crate::hub::EventHub;
use crate::session::{
    CursorPosition, Participant, Session, SessionId, SessionSettings, SessionStatus, Viewport,
};
use crate::subscription::Channel;
use eng_types::{unix_now_millis, ProjectId, UserId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Timing and sizing for sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// How often clients are expected to heartbeat.
    pub heartbeat_interval: Duration,
    /// Heartbeats a participant may miss before eviction.
    pub missed_heartbeats: u32,
    /// Participant limit for sessions that do not set one.
    pub max_participants_default: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            missed_heartbeats: 2,
            max_participants_default: 10,
        }
    }
}

impl CoordinatorConfig {
    /// Silence after which a participant is evicted.
    pub fn eviction_timeout(&self) -> Duration {
        self.heartbeat_interval * self.missed_heartbeats
    }
}

/// Request to start a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    pub project_id: ProjectId,
    pub host: UserId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub max_participants: Option<usize>,
    #[serde(default)]
    pub viewport_follows_host: bool,
}

/// Why a participant left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    /// The participant asked to leave.
    Left,
    /// No heartbeat within the eviction timeout.
    Timeout,
}

/// Manages collaboration sessions and fans their events out through the
/// [`EventHub`] on `session:<id>` channels.
///
/// Session state is keyed by user, not by connection: a dropped connection
/// leaves the participant in place until it re-attaches or is evicted.
#[derive(Debug)]
pub struct SessionCoordinator {
    sessions: RwLock<HashMap<SessionId, Session>>,
    hub: Arc<EventHub>,
    config: CoordinatorConfig,
}

impl SessionCoordinator {
    /// Creates a coordinator publishing through `hub`.
    pub fn new(hub: Arc<EventHub>, config: CoordinatorConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            hub,
            config,
        }
    }

    /// Coordinator configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    fn with_session<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session) -> Result<T, RealtimeError>,
    ) -> Result<T, RealtimeError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| RealtimeError::SessionNotFound(id.to_string()))?;
        f(session)
    }

    /// Like [`Self::with_session`], also returning the session as it stands
    /// afterwards. For lifecycle changes whose callers need the whole session.
    fn with_session_snapshot<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session) -> Result<T, RealtimeError>,
    ) -> Result<(T, Session), RealtimeError> {
        self.with_session(id, |s| {
            let value = f(s)?;
            Ok((value, s.clone()))
        })
    }

    fn publish(&self, session: &str, kind: EventKind, data: serde_json::Value, skip: Option<&str>) {
        let channel = Channel::session(session).to_string();
        self.hub
            .emit_except(RealtimeEvent::new(channel, kind, data), skip);
    }

    fn publish_status(&self, session: &Session) {
        info!(session = %session.id, status = %session.status, "Session status changed");
        self.publish(
            &session.id,
            EventKind::SessionStatusChanged,
            json!({ "session": session.id, "status": session.status }),
            None,
        );
    }

    fn client_of(session: &Session, user: &UserId) -> Option<String> {
        session.participant(user).and_then(|p| p.client().cloned())
    }

    // ==================== Lifecycle ====================

    /// Starts a waiting session with the host as its first participant.
    pub fn create_session(&self, new: NewSession) -> Result<Session, RealtimeError> {
        let mut settings = SessionSettings::new(
            new.max_participants
                .unwrap_or(self.config.max_participants_default),
        );
        settings.viewport_follows_host = new.viewport_follows_host;

        let id = uuid::Uuid::new_v4().to_string();
        let mut session = Session::new(id.clone(), new.project_id, new.host, settings, unix_now_millis())?;
        session.title = new.title;

        self.sessions.write().insert(id.clone(), session.clone());
        info!(
            session = %id,
            project = %session.project_id,
            host = %session.host,
            max_participants = session.settings.max_participants,
            "Session created"
        );
        Ok(session)
    }

    /// Gets a session by id.
    pub fn get_session(&self, id: &str) -> Result<Session, RealtimeError> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RealtimeError::SessionNotFound(id.to_string()))
    }

    /// Lists sessions, newest first, optionally for one project.
    pub fn list_sessions(&self, project: Option<&ProjectId>, include_ended: bool) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .values()
            .filter(|s| project.is_none_or(|p| &s.project_id == p))
            .filter(|s| include_ended || !s.is_ended())
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Joins a session, or re-attaches `client` if the user is already in it.
    ///
    /// The client, if given, is subscribed to the session channel.
    pub fn join_session(
        &self,
        id: &str,
        user: UserId,
        client: Option<&str>,
    ) -> Result<Session, RealtimeError> {
        let now = unix_now_millis();
        let (outcome, session) = self.with_session_snapshot(id, |s| {
            s.join(user.clone(), client.map(str::to_string), now)
        })?;

        if let Some(client) = client {
            self.hub.subscribe_client(client, Channel::session(id))?;
        }

        let participant = session.participant(&user).cloned();
        info!(session = %id, participant = %user, rejoined = outcome.rejoined, "Participant joined");
        self.publish(
            id,
            EventKind::ParticipantJoined,
            json!({ "session": id, "participant": participant, "rejoined": outcome.rejoined }),
            client,
        );
        if outcome.activated {
            self.publish_status(&session);
        }
        Ok(session)
    }

    fn remove(&self, id: &str, user: &UserId, reason: LeaveReason) -> Result<Session, RealtimeError> {
        let now = unix_now_millis();
        let (outcome, session) = self.with_session_snapshot(id, |s| s.leave(user, now))?;

        info!(session = %id, participant = %user, reason = ?reason, "Participant left");
        self.publish(
            id,
            EventKind::ParticipantLeft,
            json!({ "session": id, "user": user, "reason": reason }),
            None,
        );
        if let Some(host) = &outcome.new_host {
            info!(session = %id, host = %host, "Co-host promoted to host");
            self.publish(
                id,
                EventKind::RoleChanged,
                json!({ "session": id, "user": host, "role": "host" }),
                None,
            );
        }
        if outcome.ended {
            self.publish_status(&session);
        }
        Ok(session)
    }

    /// Leaves a session.
    pub fn leave_session(&self, id: &str, user: &UserId) -> Result<Session, RealtimeError> {
        self.remove(id, user, LeaveReason::Left)
    }

    /// Forgets `client` as the user's connection without removing the user.
    pub fn detach(&self, id: &str, user: &UserId, client: &str) {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get_mut(id) {
            if session.detach(user, client) {
                debug!(session = %id, participant = %user, "Connection detached");
            }
        }
    }

    /// Pauses an active session. Host only.
    pub fn pause_session(&self, id: &str, by: &UserId) -> Result<Session, RealtimeError> {
        let now = unix_now_millis();
        let ((), session) = self.with_session_snapshot(id, |s| s.pause(by, now))?;
        self.publish_status(&session);
        Ok(session)
    }

    /// Resumes a paused session. Host only.
    pub fn resume_session(&self, id: &str, by: &UserId) -> Result<Session, RealtimeError> {
        let now = unix_now_millis();
        let ((), session) = self.with_session_snapshot(id, |s| s.resume(by, now))?;
        self.publish_status(&session);
        Ok(session)
    }

    /// Ends a session. Host only.
    pub fn end_session(&self, id: &str, by: &UserId) -> Result<Session, RealtimeError> {
        let now = unix_now_millis();
        let ((), session) = self.with_session_snapshot(id, |s| s.end(by, now))?;
        self.publish_status(&session);
        Ok(session)
    }

    /// Makes a participant a co-host. Host only.
    pub fn promote_cohost(
        &self,
        id: &str,
        by: &UserId,
        user: &UserId,
    ) -> Result<Session, RealtimeError> {
        let ((), session) = self.with_session_snapshot(id, |s| s.promote_cohost(by, user))?;
        info!(session = %id, participant = %user, "Promoted to co-host");
        self.publish(
            id,
            EventKind::RoleChanged,
            json!({ "session": id, "user": user, "role": "co_host" }),
            None,
        );
        Ok(session)
    }

    // ==================== Presence ====================

    /// Records a heartbeat now.
    pub fn heartbeat(&self, id: &str, user: &UserId) -> Result<(), RealtimeError> {
        self.heartbeat_at(id, user, unix_now_millis())
    }

    /// Records a heartbeat at `now` (Unix milliseconds).
    pub fn heartbeat_at(&self, id: &str, user: &UserId, now: u64) -> Result<(), RealtimeError> {
        self.with_session(id, |s| s.touch(user, now)).map(|_| ())
    }

    /// Evicts participants silent past the eviction timeout.
    pub fn evict_stale(&self) -> Vec<(SessionId, UserId)> {
        self.evict_stale_at(unix_now_millis())
    }

    /// Evicts participants silent past the eviction timeout as of `now`.
    ///
    /// Remaining participants receive `participant_left` with reason
    /// `timeout`.
    pub fn evict_stale_at(&self, now: u64) -> Vec<(SessionId, UserId)> {
        let timeout = self.config.eviction_timeout().as_millis() as u64;
        let stale: Vec<(SessionId, UserId)> = self
            .sessions
            .read()
            .values()
            .flat_map(|s| {
                s.stale_participants(now, timeout)
                    .into_iter()
                    .map(|user| (s.id.clone(), user))
            })
            .collect();

        stale
            .into_iter()
            .filter(|(id, user)| {
                // Lost a race with a leave or a fresh heartbeat.
                let still_stale = self
                    .sessions
                    .read()
                    .get(id)
                    .map(|s| s.stale_participants(now, timeout).contains(user))
                    .unwrap_or(false);
                still_stale && self.remove(id, user, LeaveReason::Timeout).is_ok()
            })
            .collect()
    }

    /// Runs [`Self::evict_stale`] once per heartbeat interval until the
    /// coordinator is dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::downgrade(self);
        let period = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                let evicted = coordinator.evict_stale();
                if !evicted.is_empty() {
                    info!(count = evicted.len(), "Evicted silent participants");
                }
            }
        })
    }

    // ==================== Live state ====================

    /// Applies a cursor move and relays it to the other participants.
    ///
    /// Returns false if the update was dropped as out of date or because
    /// the session is paused.
    pub fn update_cursor(
        &self,
        id: &str,
        user: &UserId,
        seq: u64,
        cursor: CursorPosition,
    ) -> Result<bool, RealtimeError> {
        let now = unix_now_millis();
        let (applied, sender) = self.with_session(id, |s| {
            let applied = s.apply_cursor(user, seq, cursor.clone(), now)?;
            Ok((applied, Self::client_of(s, user)))
        })?;
        if applied {
            debug!(session = %id, participant = %user, seq, "Cursor moved");
            self.publish(
                id,
                EventKind::CursorMoved,
                json!({ "session": id, "user": user, "seq": seq, "cursor": cursor }),
                sender.as_deref(),
            );
        }
        Ok(applied)
    }

    /// Applies a shared viewport change and relays it.
    pub fn update_viewport(
        &self,
        id: &str,
        user: &UserId,
        seq: u64,
        viewport: Viewport,
    ) -> Result<bool, RealtimeError> {
        let now = unix_now_millis();
        let (applied, sender) = self.with_session(id, |s| {
            let applied = s.apply_viewport(user, seq, viewport.clone(), now)?;
            Ok((applied, Self::client_of(s, user)))
        })?;
        if applied {
            debug!(session = %id, participant = %user, seq, "Viewport changed");
            self.publish(
                id,
                EventKind::ViewportChanged,
                json!({ "session": id, "user": user, "seq": seq, "viewport": viewport }),
                sender.as_deref(),
            );
        }
        Ok(applied)
    }

    /// Toggles a participant's video or audio.
    pub fn set_media(
        &self,
        id: &str,
        user: &UserId,
        video: Option<bool>,
        audio: Option<bool>,
    ) -> Result<Participant, RealtimeError> {
        let participant = self.with_session(id, |s| s.set_media(user, video, audio))?;
        debug!(
            session = %id,
            participant = %user,
            video = participant.video_enabled,
            audio = participant.audio_enabled,
            "Media changed"
        );
        self.publish(
            id,
            EventKind::MediaChanged,
            json!({
                "session": id,
                "user": user,
                "video_enabled": participant.video_enabled,
                "audio_enabled": participant.audio_enabled,
            }),
            None,
        );
        Ok(participant)
    }

    /// Number of sessions that have not ended.
    pub fn live_session_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| s.status != SessionStatus::Ended)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientReceiver;

    fn user(name: &str) -> UserId {
        UserId::parse(name).unwrap()
    }

    fn coordinator() -> (Arc<EventHub>, SessionCoordinator) {
        let hub = Arc::new(EventHub::new());
        let coordinator = SessionCoordinator::new(hub.clone(), CoordinatorConfig::default());
        (hub, coordinator)
    }

    fn new_session(max: Option<usize>) -> NewSession {
        NewSession {
            project_id: ProjectId::parse("gearbox").unwrap(),
            host: user("host"),
            title: Some("Gearbox review".into()),
            max_participants: max,
            viewport_follows_host: false,
        }
    }

    fn drain(rx: &mut ClientReceiver) -> Vec<serde_json::Value> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| serde_json::from_str(&m).unwrap())
            .collect()
    }

    #[test]
    fn test_third_join_rejected_when_full() {
        let (_, coordinator) = coordinator();
        let session = coordinator.create_session(new_session(Some(2))).unwrap();

        coordinator.join_session(&session.id, user("ann"), None).unwrap();
        let err = coordinator
            .join_session(&session.id, user("bob"), None)
            .unwrap_err();
        assert!(matches!(err, RealtimeError::SessionFull { max: 2, .. }));
        assert_eq!(coordinator.get_session(&session.id).unwrap().participants.len(), 2);
    }

    #[test]
    fn test_default_participant_limit() {
        let (_, coordinator) = coordinator();
        let session = coordinator.create_session(new_session(None)).unwrap();
        assert_eq!(session.settings.max_participants, 10);
        assert!(coordinator.create_session(new_session(Some(0))).is_err());
        assert!(matches!(
            coordinator.join_session("missing", user("ann"), None),
            Err(RealtimeError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cursor_relayed_to_others_only() {
        let (hub, coordinator) = coordinator();
        let session = coordinator.create_session(new_session(None)).unwrap();
        let (host_client, mut host_rx) = hub.connect(Some(user("host"))).unwrap();
        let (ann_client, mut ann_rx) = hub.connect(Some(user("ann"))).unwrap();

        coordinator
            .join_session(&session.id, user("host"), Some(&host_client.id))
            .unwrap();
        coordinator
            .join_session(&session.id, user("ann"), Some(&ann_client.id))
            .unwrap();
        drain(&mut host_rx);
        drain(&mut ann_rx);

        let cursor = CursorPosition {
            x: 1.0,
            y: 2.0,
            z: 3.0,
            file_path: Some("part.cad".into()),
        };
        assert!(coordinator
            .update_cursor(&session.id, &user("ann"), 1, cursor.clone())
            .unwrap());
        assert!(!coordinator
            .update_cursor(&session.id, &user("ann"), 1, cursor)
            .unwrap());

        let host_msgs = drain(&mut host_rx);
        assert_eq!(host_msgs.len(), 1);
        assert_eq!(host_msgs[0]["event"], "cursor_moved");
        assert_eq!(host_msgs[0]["data"]["cursor"]["file_path"], "part.cad");
        assert!(drain(&mut ann_rx).is_empty());
    }

    #[tokio::test]
    async fn test_reconnected_participant_relays_from_seq_one() {
        let (hub, coordinator) = coordinator();
        let session = coordinator.create_session(new_session(None)).unwrap();
        let (host_client, mut host_rx) = hub.connect(Some(user("host"))).unwrap();
        let (first, _first_rx) = hub.connect(Some(user("ann"))).unwrap();
        coordinator
            .join_session(&session.id, user("host"), Some(&host_client.id))
            .unwrap();
        coordinator
            .join_session(&session.id, user("ann"), Some(&first.id))
            .unwrap();
        let view = Viewport {
            position: [0.0, 0.0, 10.0],
            target: [0.0; 3],
            zoom: 1.0,
        };
        let cursor = CursorPosition {
            x: 1.0,
            y: 0.0,
            z: 0.0,
            file_path: None,
        };
        assert!(coordinator
            .update_cursor(&session.id, &user("ann"), 40, cursor.clone())
            .unwrap());
        assert!(coordinator
            .update_viewport(&session.id, &user("ann"), 40, view.clone())
            .unwrap());

        let (second, mut second_rx) = hub.connect(Some(user("ann"))).unwrap();
        coordinator
            .join_session(&session.id, user("ann"), Some(&second.id))
            .unwrap();
        drain(&mut host_rx);
        drain(&mut second_rx);

        assert!(coordinator
            .update_cursor(&session.id, &user("ann"), 1, cursor)
            .unwrap());
        assert!(coordinator
            .update_viewport(&session.id, &user("ann"), 1, view)
            .unwrap());

        let host_msgs = drain(&mut host_rx);
        assert_eq!(host_msgs.len(), 2);
        assert_eq!(host_msgs[0]["event"], "cursor_moved");
        assert_eq!(host_msgs[1]["event"], "viewport_changed");
        // The sender's current connection is skipped.
        assert!(drain(&mut second_rx).is_empty());
    }

    #[tokio::test]
    async fn test_join_activates_and_notifies() {
        let (hub, coordinator) = coordinator();
        let session = coordinator.create_session(new_session(None)).unwrap();
        let (host_client, mut host_rx) = hub.connect(None).unwrap();
        coordinator
            .join_session(&session.id, user("host"), Some(&host_client.id))
            .unwrap();

        let joined = coordinator.join_session(&session.id, user("ann"), None).unwrap();
        assert_eq!(joined.status, SessionStatus::Active);

        let events: Vec<String> = drain(&mut host_rx)
            .into_iter()
            .map(|m| m["event"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(events, vec!["participant_joined", "session_status_changed"]);
    }

    #[test]
    fn test_eviction_after_missed_heartbeats() {
        let (hub, coordinator) = coordinator();
        let mut listener = hub.subscribe_events();
        let session = coordinator.create_session(new_session(None)).unwrap();
        coordinator.join_session(&session.id, user("ann"), None).unwrap();

        let base = coordinator.get_session(&session.id).unwrap().created_at + 1_000;
        coordinator.heartbeat_at(&session.id, &user("host"), base + 50_000).unwrap();

        // Within 2 x 30s of ann's last activity nothing happens.
        assert!(coordinator.evict_stale_at(base + 30_000).is_empty());

        let evicted = coordinator.evict_stale_at(base + 61_000);
        assert_eq!(evicted, vec![(session.id.clone(), user("ann"))]);
        let session = coordinator.get_session(&session.id).unwrap();
        assert!(session.participant(&user("ann")).is_none());
        assert_eq!(session.status, SessionStatus::Active);

        let left = std::iter::from_fn(|| listener.try_recv().ok())
            .find(|e| e.event == EventKind::ParticipantLeft)
            .unwrap();
        assert_eq!(left.data["reason"], "timeout");
    }

    #[test]
    fn test_host_leave_promotes_cohost() {
        let (_, coordinator) = coordinator();
        let session = coordinator.create_session(new_session(None)).unwrap();
        coordinator.join_session(&session.id, user("ann"), None).unwrap();
        coordinator
            .promote_cohost(&session.id, &user("host"), &user("ann"))
            .unwrap();

        let after = coordinator.leave_session(&session.id, &user("host")).unwrap();
        assert_eq!(after.host, user("ann"));
        assert_eq!(after.status, SessionStatus::Active);

        coordinator.end_session(&session.id, &user("ann")).unwrap();
        assert_eq!(coordinator.live_session_count(), 0);
        assert!(matches!(
            coordinator.join_session(&session.id, user("bob"), None),
            Err(RealtimeError::SessionEnded(_))
        ));
    }

    #[test]
    fn test_list_sessions() {
        let (_, coordinator) = coordinator();
        let a = coordinator.create_session(new_session(None)).unwrap();
        coordinator.create_session(new_session(None)).unwrap();
        coordinator.end_session(&a.id, &user("host")).unwrap();

        let project = ProjectId::parse("gearbox").unwrap();
        assert_eq!(coordinator.list_sessions(Some(&project), false).len(), 1);
        assert_eq!(coordinator.list_sessions(Some(&project), true).len(), 2);
        let other = ProjectId::parse("rover").unwrap();
        assert!(coordinator.list_sessions(Some(&other), true).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_stops_when_coordinator_dropped() {
        let hub = Arc::new(EventHub::new());
        let coordinator = Arc::new(SessionCoordinator::new(
            hub,
            CoordinatorConfig {
                heartbeat_interval: Duration::from_secs(1),
                ..Default::default()
            },
        ));
        let handle = coordinator.spawn_reaper();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!handle.is_finished());

        drop(coordinator);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.await.is_ok());
    }
}
