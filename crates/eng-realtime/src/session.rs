//! Collaboration session state.
//!
//! A [`Session`] is a plain state machine. It knows nothing about
//! connections or broadcasting; [`crate::SessionCoordinator`] drives it
//! under a lock and publishes the resulting events.

use crate::client::ClientId;
use crate::error::RealtimeError;
use eng_types::{ProjectId, UserId};
use serde::{Deserialize, Serialize};

/// Unique identifier of a session.
pub type SessionId = String;

/// Upper bound on `max_participants`.
pub const MAX_PARTICIPANTS_LIMIT: usize = 100;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created; only the host is present.
    Waiting,
    /// At least one guest has joined.
    Active,
    /// Host paused live updates.
    Paused,
    /// Terminal.
    Ended,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Waiting => write!(f, "waiting"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Paused => write!(f, "paused"),
            SessionStatus::Ended => write!(f, "ended"),
        }
    }
}

/// Role of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Host,
    CoHost,
    Participant,
}

/// Per-session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Maximum number of participants, host included.
    pub max_participants: usize,
    /// Only the host and co-hosts may move the shared viewport.
    #[serde(default)]
    pub viewport_follows_host: bool,
}

impl SessionSettings {
    /// Settings with the given participant limit.
    pub fn new(max_participants: usize) -> Self {
        Self {
            max_participants,
            viewport_follows_host: false,
        }
    }

    /// Checks the settings are usable.
    pub fn validate(&self) -> Result<(), RealtimeError> {
        if self.max_participants == 0 || self.max_participants > MAX_PARTICIPANTS_LIMIT {
            return Err(RealtimeError::InvalidSettings(format!(
                "max_participants must be between 1 and {}",
                MAX_PARTICIPANTS_LIMIT
            )));
        }
        Ok(())
    }
}

/// A participant's pointer in the shared model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    /// File the cursor is in, if the session spans several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// Shared camera state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub position: [f64; 3],
    pub target: [f64; 3],
    pub zoom: f64,
}

/// A user present in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user: UserId,
    pub role: ParticipantRole,
    /// Unix timestamp in milliseconds.
    pub joined_at: u64,
    /// Last heartbeat or activity, Unix milliseconds.
    pub last_seen: u64,
    pub cursor: Option<CursorPosition>,
    pub video_enabled: bool,
    pub audio_enabled: bool,
    /// Highest cursor sequence applied from the current connection.
    #[serde(skip)]
    pub(crate) cursor_seq: u64,
    /// Highest viewport sequence applied from the current connection.
    #[serde(skip)]
    pub(crate) viewport_seq: u64,
    /// Connection currently carrying this participant's presence.
    #[serde(skip)]
    pub(crate) client: Option<ClientId>,
}

impl Participant {
    fn new(user: UserId, role: ParticipantRole, client: Option<ClientId>, now: u64) -> Self {
        Self {
            user,
            role,
            joined_at: now,
            last_seen: now,
            cursor: None,
            video_enabled: false,
            audio_enabled: false,
            cursor_seq: 0,
            viewport_seq: 0,
            client,
        }
    }

    /// Connection currently attached, if any.
    pub fn client(&self) -> Option<&ClientId> {
        self.client.as_ref()
    }

    fn can_moderate(&self) -> bool {
        matches!(self.role, ParticipantRole::Host | ParticipantRole::CoHost)
    }
}

/// What a join did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The user was already present; only the connection was replaced.
    pub rejoined: bool,
    /// The join moved the session from waiting to active.
    pub activated: bool,
}

/// What a leave did.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaveOutcome {
    pub participant: Participant,
    /// Co-host promoted because the host left.
    pub new_host: Option<UserId>,
    /// The session ended as a result.
    pub ended: bool,
}

/// A live collaboration session on a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub project_id: ProjectId,
    pub title: Option<String>,
    pub host: UserId,
    pub status: SessionStatus,
    pub settings: SessionSettings,
    /// Participants in join order.
    pub participants: Vec<Participant>,
    pub viewport: Option<Viewport>,
    /// Unix milliseconds.
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
}

impl Session {
    /// Creates a waiting session with the host as its only participant.
    pub fn new(
        id: SessionId,
        project_id: ProjectId,
        host: UserId,
        settings: SessionSettings,
        now: u64,
    ) -> Result<Self, RealtimeError> {
        settings.validate()?;
        Ok(Self {
            id,
            project_id,
            title: None,
            participants: vec![Participant::new(host.clone(), ParticipantRole::Host, None, now)],
            host,
            status: SessionStatus::Waiting,
            settings,
            viewport: None,
            created_at: now,
            started_at: None,
            ended_at: None,
        })
    }

    /// Returns true once the session has ended.
    pub fn is_ended(&self) -> bool {
        self.status == SessionStatus::Ended
    }

    /// Looks up a participant.
    pub fn participant(&self, user: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.user == user)
    }

    fn participant_mut(&mut self, user: &UserId) -> Result<&mut Participant, RealtimeError> {
        let session = self.id.clone();
        self.participants
            .iter_mut()
            .find(|p| &p.user == user)
            .ok_or_else(|| RealtimeError::ParticipantNotFound {
                session,
                user: user.to_string(),
            })
    }

    fn ensure_live(&self) -> Result<(), RealtimeError> {
        if self.is_ended() {
            Err(RealtimeError::SessionEnded(self.id.clone()))
        } else {
            Ok(())
        }
    }

    fn ensure_host(&self, user: &UserId, action: &str) -> Result<(), RealtimeError> {
        if &self.host == user {
            Ok(())
        } else {
            Err(RealtimeError::NotHost {
                session: self.id.clone(),
                action: action.to_string(),
            })
        }
    }

    fn transition(&mut self, to: SessionStatus, action: &str, now: u64) -> Result<(), RealtimeError> {
        use SessionStatus::*;
        let allowed = matches!(
            (self.status, to),
            (Waiting, Active) | (Active, Paused) | (Paused, Active) | (Waiting | Active | Paused, Ended)
        );
        if !allowed {
            if self.is_ended() {
                return Err(RealtimeError::SessionEnded(self.id.clone()));
            }
            return Err(RealtimeError::InvalidTransition {
                action: action.to_string(),
                status: self.status.to_string(),
            });
        }

        if to == Active && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if to == Ended {
            self.ended_at = Some(now);
            for participant in &mut self.participants {
                participant.client = None;
            }
        }
        self.status = to;
        Ok(())
    }

    /// Adds a participant, or re-attaches one already present.
    ///
    /// Sequence numbers restart with every connection, so re-attaching on a
    /// different client resets the participant's cursor and viewport
    /// sequences.
    pub fn join(
        &mut self,
        user: UserId,
        client: Option<ClientId>,
        now: u64,
    ) -> Result<JoinOutcome, RealtimeError> {
        self.ensure_live()?;

        if let Ok(existing) = self.participant_mut(&user) {
            if existing.client != client {
                existing.cursor_seq = 0;
                existing.viewport_seq = 0;
            }
            existing.client = client;
            existing.last_seen = now;
            return Ok(JoinOutcome {
                rejoined: true,
                activated: false,
            });
        }

        if self.participants.len() >= self.settings.max_participants {
            return Err(RealtimeError::SessionFull {
                session: self.id.clone(),
                max: self.settings.max_participants,
            });
        }

        let role = if user == self.host {
            ParticipantRole::Host
        } else {
            ParticipantRole::Participant
        };
        let activated = role != ParticipantRole::Host && self.status == SessionStatus::Waiting;
        self.participants
            .push(Participant::new(user, role, client, now));
        if activated {
            self.transition(SessionStatus::Active, "activate", now)?;
        }
        Ok(JoinOutcome {
            rejoined: false,
            activated,
        })
    }

    /// Removes a participant.
    ///
    /// A departing host hands over to the longest-present co-host; with no
    /// co-host, or with nobody left, the session ends.
    pub fn leave(&mut self, user: &UserId, now: u64) -> Result<LeaveOutcome, RealtimeError> {
        self.ensure_live()?;
        let index = self
            .participants
            .iter()
            .position(|p| &p.user == user)
            .ok_or_else(|| RealtimeError::ParticipantNotFound {
                session: self.id.clone(),
                user: user.to_string(),
            })?;
        let participant = self.participants.remove(index);

        let mut new_host = None;
        let mut ended = false;
        if participant.role == ParticipantRole::Host {
            match self
                .participants
                .iter_mut()
                .find(|p| p.role == ParticipantRole::CoHost)
            {
                Some(cohost) => {
                    cohost.role = ParticipantRole::Host;
                    self.host = cohost.user.clone();
                    new_host = Some(cohost.user.clone());
                }
                None => ended = true,
            }
        }
        if self.participants.is_empty() {
            ended = true;
        }
        if ended {
            self.transition(SessionStatus::Ended, "end", now)?;
        }

        Ok(LeaveOutcome {
            participant,
            new_host,
            ended,
        })
    }

    /// Drops the connection binding if it still belongs to `client`.
    pub fn detach(&mut self, user: &UserId, client: &str) -> bool {
        match self.participants.iter_mut().find(|p| &p.user == user) {
            Some(p) if p.client.as_deref() == Some(client) => {
                p.client = None;
                true
            }
            _ => false,
        }
    }

    /// Refreshes a participant's liveness.
    pub fn touch(&mut self, user: &UserId, now: u64) -> Result<(), RealtimeError> {
        self.ensure_live()?;
        let participant = self.participant_mut(user)?;
        participant.last_seen = participant.last_seen.max(now);
        Ok(())
    }

    /// Participants not seen within `timeout_ms` of `now`.
    pub fn stale_participants(&self, now: u64, timeout_ms: u64) -> Vec<UserId> {
        if self.is_ended() {
            return Vec::new();
        }
        self.participants
            .iter()
            .filter(|p| now.saturating_sub(p.last_seen) > timeout_ms)
            .map(|p| p.user.clone())
            .collect()
    }

    /// Applies a cursor move unless an update with a higher or equal
    /// sequence number was already applied. Returns whether it applied.
    pub fn apply_cursor(
        &mut self,
        user: &UserId,
        seq: u64,
        cursor: CursorPosition,
        now: u64,
    ) -> Result<bool, RealtimeError> {
        self.ensure_live()?;
        let paused = self.status == SessionStatus::Paused;
        let participant = self.participant_mut(user)?;
        participant.last_seen = participant.last_seen.max(now);
        if paused || seq <= participant.cursor_seq {
            return Ok(false);
        }
        participant.cursor_seq = seq;
        participant.cursor = Some(cursor);
        Ok(true)
    }

    /// Applies a shared viewport change. Sequences are per sender: an update
    /// is dropped only if that sender already had a higher or equal one
    /// applied.
    pub fn apply_viewport(
        &mut self,
        user: &UserId,
        seq: u64,
        viewport: Viewport,
        now: u64,
    ) -> Result<bool, RealtimeError> {
        self.ensure_live()?;
        let follows_host = self.settings.viewport_follows_host;
        let paused = self.status == SessionStatus::Paused;
        let participant = self.participant_mut(user)?;
        participant.last_seen = participant.last_seen.max(now);
        if follows_host && !participant.can_moderate() {
            return Err(RealtimeError::NotHost {
                session: self.id.clone(),
                action: "move the shared viewport".to_string(),
            });
        }
        if paused || seq <= participant.viewport_seq {
            return Ok(false);
        }
        participant.viewport_seq = seq;
        self.viewport = Some(viewport);
        Ok(true)
    }

    /// Updates media toggles. `None` leaves a toggle unchanged.
    pub fn set_media(
        &mut self,
        user: &UserId,
        video: Option<bool>,
        audio: Option<bool>,
    ) -> Result<Participant, RealtimeError> {
        self.ensure_live()?;
        let participant = self.participant_mut(user)?;
        if let Some(video) = video {
            participant.video_enabled = video;
        }
        if let Some(audio) = audio {
            participant.audio_enabled = audio;
        }
        Ok(participant.clone())
    }

    /// Makes `user` a co-host.
    pub fn promote_cohost(&mut self, by: &UserId, user: &UserId) -> Result<(), RealtimeError> {
        self.ensure_live()?;
        self.ensure_host(by, "promote a co-host")?;
        let participant = self.participant_mut(user)?;
        if participant.role == ParticipantRole::Participant {
            participant.role = ParticipantRole::CoHost;
        }
        Ok(())
    }

    /// Pauses an active session.
    pub fn pause(&mut self, by: &UserId, now: u64) -> Result<(), RealtimeError> {
        self.ensure_live()?;
        self.ensure_host(by, "pause")?;
        self.transition(SessionStatus::Paused, "pause", now)
    }

    /// Resumes a paused session.
    pub fn resume(&mut self, by: &UserId, now: u64) -> Result<(), RealtimeError> {
        self.ensure_live()?;
        self.ensure_host(by, "resume")?;
        if self.status != SessionStatus::Paused {
            return Err(RealtimeError::InvalidTransition {
                action: "resume".to_string(),
                status: self.status.to_string(),
            });
        }
        self.transition(SessionStatus::Active, "resume", now)
    }

    /// Ends the session.
    pub fn end(&mut self, by: &UserId, now: u64) -> Result<(), RealtimeError> {
        self.ensure_live()?;
        self.ensure_host(by, "end")?;
        self.transition(SessionStatus::Ended, "end", now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> UserId {
        UserId::parse(name).unwrap()
    }

    fn session(max: usize) -> Session {
        Session::new(
            "s1".to_string(),
            ProjectId::parse("gearbox").unwrap(),
            user("host"),
            SessionSettings::new(max),
            1_000,
        )
        .unwrap()
    }

    fn cursor(x: f64) -> CursorPosition {
        CursorPosition {
            x,
            y: 0.0,
            z: 0.0,
            file_path: None,
        }
    }

    #[test]
    fn test_first_guest_activates() {
        let mut s = session(4);
        assert_eq!(s.status, SessionStatus::Waiting);

        let outcome = s.join(user("host"), Some("c0".into()), 1_100).unwrap();
        assert!(outcome.rejoined);
        assert_eq!(s.status, SessionStatus::Waiting);

        let outcome = s.join(user("ann"), None, 1_200).unwrap();
        assert!(outcome.activated);
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.started_at, Some(1_200));
    }

    #[test]
    fn test_session_full() {
        let mut s = session(2);
        s.join(user("ann"), None, 1_100).unwrap();
        let err = s.join(user("bob"), None, 1_200).unwrap_err();
        assert!(matches!(err, RealtimeError::SessionFull { max: 2, .. }));

        // Re-joining does not count twice.
        assert!(s.join(user("ann"), Some("c2".into()), 1_300).unwrap().rejoined);
        assert_eq!(s.participants.len(), 2);
    }

    #[test]
    fn test_invalid_settings() {
        assert!(SessionSettings::new(0).validate().is_err());
        assert!(SessionSettings::new(MAX_PARTICIPANTS_LIMIT + 1).validate().is_err());
        assert!(SessionSettings::new(2).validate().is_ok());
    }

    #[test]
    fn test_host_leaving_without_cohost_ends() {
        let mut s = session(4);
        s.join(user("ann"), None, 1_100).unwrap();
        let outcome = s.leave(&user("host"), 1_200).unwrap();
        assert!(outcome.ended);
        assert_eq!(s.status, SessionStatus::Ended);
        assert!(matches!(
            s.join(user("bob"), None, 1_300),
            Err(RealtimeError::SessionEnded(_))
        ));
    }

    #[test]
    fn test_host_leaving_promotes_cohost() {
        let mut s = session(4);
        s.join(user("ann"), None, 1_100).unwrap();
        s.join(user("bob"), None, 1_200).unwrap();
        assert!(s.promote_cohost(&user("ann"), &user("bob")).is_err());
        s.promote_cohost(&user("host"), &user("bob")).unwrap();

        let outcome = s.leave(&user("host"), 1_300).unwrap();
        assert_eq!(outcome.new_host, Some(user("bob")));
        assert!(!outcome.ended);
        assert_eq!(s.host, user("bob"));
        assert_eq!(
            s.participant(&user("bob")).unwrap().role,
            ParticipantRole::Host
        );
    }

    #[test]
    fn test_last_participant_leaving_ends() {
        let mut s = session(4);
        s.join(user("ann"), None, 1_100).unwrap();
        s.leave(&user("ann"), 1_200).unwrap();
        assert_eq!(s.status, SessionStatus::Active);
        let outcome = s.leave(&user("host"), 1_300).unwrap();
        assert!(outcome.ended);
    }

    #[test]
    fn test_waiting_cancelled_by_host() {
        let mut s = session(4);
        assert!(s.end(&user("ann"), 1_100).is_err());
        s.end(&user("host"), 1_100).unwrap();
        assert_eq!(s.status, SessionStatus::Ended);
        assert_eq!(s.ended_at, Some(1_100));
    }

    #[test]
    fn test_pause_resume_transitions() {
        let mut s = session(4);
        assert!(matches!(
            s.pause(&user("host"), 1_050),
            Err(RealtimeError::InvalidTransition { .. })
        ));
        s.join(user("ann"), None, 1_100).unwrap();
        assert!(s.resume(&user("host"), 1_150).is_err());
        s.pause(&user("host"), 1_200).unwrap();
        assert_eq!(s.status, SessionStatus::Paused);
        s.resume(&user("host"), 1_300).unwrap();
        assert_eq!(s.status, SessionStatus::Active);
        s.end(&user("host"), 1_400).unwrap();
        assert!(matches!(
            s.pause(&user("host"), 1_500),
            Err(RealtimeError::SessionEnded(_))
        ));
    }

    #[test]
    fn test_cursor_last_write_wins() {
        let mut s = session(4);
        s.join(user("ann"), None, 1_100).unwrap();

        assert!(s.apply_cursor(&user("ann"), 2, cursor(2.0), 1_200).unwrap());
        // Older update delivered late.
        assert!(!s.apply_cursor(&user("ann"), 1, cursor(1.0), 1_300).unwrap());
        assert!(!s.apply_cursor(&user("ann"), 2, cursor(9.0), 1_300).unwrap());
        assert_eq!(s.participant(&user("ann")).unwrap().cursor, Some(cursor(2.0)));

        // Sequences are per participant.
        assert!(s.apply_cursor(&user("host"), 1, cursor(5.0), 1_300).unwrap());
        assert!(s.apply_cursor(&user("ann"), 3, cursor(3.0), 1_400).unwrap());
    }

    #[test]
    fn test_paused_session_drops_updates() {
        let mut s = session(4);
        s.join(user("ann"), None, 1_100).unwrap();
        s.pause(&user("host"), 1_200).unwrap();
        assert!(!s.apply_cursor(&user("ann"), 1, cursor(1.0), 1_300).unwrap());
        s.resume(&user("host"), 1_400).unwrap();
        assert!(s.apply_cursor(&user("ann"), 1, cursor(1.0), 1_500).unwrap());
    }

    #[test]
    fn test_viewport_sequence_and_policy() {
        let mut s = session(4);
        s.join(user("ann"), None, 1_100).unwrap();
        let view = |zoom| Viewport {
            position: [0.0, 0.0, 10.0],
            target: [0.0; 3],
            zoom,
        };

        assert!(s.apply_viewport(&user("ann"), 5, view(1.0), 1_200).unwrap());
        assert!(!s.apply_viewport(&user("ann"), 4, view(9.0), 1_200).unwrap());
        assert_eq!(s.viewport, Some(view(1.0)));

        // Another sender's lower sequence is still newer for that sender.
        assert!(s.apply_viewport(&user("host"), 1, view(2.0), 1_250).unwrap());
        assert_eq!(s.viewport, Some(view(2.0)));
        assert!(!s.apply_viewport(&user("host"), 1, view(8.0), 1_260).unwrap());
        assert!(s.apply_viewport(&user("ann"), 6, view(1.5), 1_270).unwrap());
        assert_eq!(s.viewport, Some(view(1.5)));

        s.settings.viewport_follows_host = true;
        assert!(matches!(
            s.apply_viewport(&user("ann"), 6, view(3.0), 1_300),
            Err(RealtimeError::NotHost { .. })
        ));
        assert!(s.apply_viewport(&user("host"), 6, view(3.0), 1_300).unwrap());
    }

    #[test]
    fn test_reconnect_restarts_sequences() {
        let mut s = session(4);
        s.join(user("ann"), Some("c1".into()), 1_100).unwrap();
        let view = Viewport {
            position: [0.0, 0.0, 10.0],
            target: [0.0; 3],
            zoom: 1.0,
        };
        assert!(s.apply_cursor(&user("ann"), 50, cursor(5.0), 1_200).unwrap());
        assert!(s.apply_viewport(&user("ann"), 50, view.clone(), 1_200).unwrap());

        // Same connection re-sent: sequences carry on.
        assert!(s.join(user("ann"), Some("c1".into()), 1_300).unwrap().rejoined);
        assert!(!s.apply_cursor(&user("ann"), 1, cursor(1.0), 1_400).unwrap());

        // New connection counts from the start again.
        assert!(s.join(user("ann"), Some("c2".into()), 1_500).unwrap().rejoined);
        assert!(s.apply_cursor(&user("ann"), 1, cursor(1.0), 1_600).unwrap());
        assert!(s.apply_viewport(&user("ann"), 1, view, 1_600).unwrap());
        assert_eq!(s.participant(&user("ann")).unwrap().cursor, Some(cursor(1.0)));
        assert!(!s.apply_cursor(&user("ann"), 1, cursor(2.0), 1_700).unwrap());
    }

    #[test]
    fn test_stale_participants_and_detach() {
        let mut s = session(4);
        s.join(user("ann"), Some("c1".into()), 1_000).unwrap();
        s.touch(&user("host"), 60_000).unwrap();

        assert_eq!(s.stale_participants(62_000, 60_000), vec![user("ann")]);
        assert!(!s.detach(&user("ann"), "other"));
        assert!(s.detach(&user("ann"), "c1"));
        assert!(s.participant(&user("ann")).unwrap().client().is_none());
    }

    #[test]
    fn test_media_toggles() {
        let mut s = session(4);
        let p = s.set_media(&user("host"), Some(true), None).unwrap();
        assert!(p.video_enabled);
        assert!(!p.audio_enabled);
        let p = s.set_media(&user("host"), None, Some(true)).unwrap();
        assert!(p.video_enabled && p.audio_enabled);
        assert!(s.set_media(&user("ghost"), Some(true), None).is_err());
    }
}
