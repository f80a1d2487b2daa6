//! # eng Real-time
//!
//! Live collaboration and project event streaming for eng.com.
//!
//! ## Features
//!
//! - **Event Hub**: Central management of WebSocket connections
//! - **Subscriptions**: Channel-based subscription model
//! - **Sessions**: Presence, cursors, shared viewport and media toggles
//! - **Heartbeats**: Silent participants are evicted by a background reaper
//! - **Reconnect**: Bounded exponential backoff for dropped connections
//!
//! ## Channel Types
//!
//! - `project:<id>` - All events for a project
//! - `project:<id>/pulls` - Pull request events only
//! - `project:<id>/branches` - Branch and commit events only
//! - `session:<id>` - Live events of one collaboration session
//!
//! ## Example
//!
//! ```rust
//! use eng_realtime::{CoordinatorConfig, EventHub, NewSession, SessionCoordinator};
//! use eng_types::{ProjectId, UserId};
//! use std::sync::Arc;
//!
//! let hub = Arc::new(EventHub::new());
//! let sessions = SessionCoordinator::new(hub.clone(), CoordinatorConfig::default());
//!
//! let session = sessions
//!     .create_session(NewSession {
//!         project_id: ProjectId::parse("gearbox").unwrap(),
//!         host: UserId::parse("alice").unwrap(),
//!         title: None,
//!         max_participants: Some(4),
//!         viewport_follows_host: false,
//!     })
//!     .unwrap();
//!
//! let (client, _receiver) = hub.connect(None).unwrap();
//! sessions
//!     .join_session(&session.id, UserId::parse("bob").unwrap(), Some(&client.id))
//!     .unwrap();
//! ```
//!
//! ## WebSocket Protocol
//!
//! ### Client -> Server Messages
//!
//! ```json
//! {"type": "subscribe", "channel": "project:gearbox/pulls"}
//! {"type": "unsubscribe", "channel": "project:gearbox/pulls"}
//! {"type": "ping"}
//! ```
//!
//! ### Server -> Client Messages
//!
//! ```json
//! {"type": "subscribed", "channel": "project:gearbox/pulls"}
//! {"type": "event", "channel": "project:gearbox/pulls", "event": "pull_request_opened", ...}
//! {"type": "pong"}
//! ```

pub mod client;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod hub;
pub mod reconnect;
pub mod session;
pub mod subscription;

// Re-export main types
pub use client::{Client, ClientId, ClientMetadata, ClientReceiver};
pub use coordinator::{CoordinatorConfig, LeaveReason, NewSession, SessionCoordinator};
pub use error::RealtimeError;
pub use event::{EventKind, RealtimeEvent};
pub use hub::{ClientCommand, EventHub, HubStats, ServerMessage};
pub use reconnect::{connect_with_retry, ReconnectPolicy};
pub use session::{
    CursorPosition, Participant, ParticipantRole, Session, SessionId, SessionSettings,
    SessionStatus, Viewport, MAX_PARTICIPANTS_LIMIT,
};
pub use subscription::{
    Channel, ChannelType, ClientSubscriptions, ProjectFilter, MAX_SUBSCRIPTIONS_PER_CLIENT,
};

/// Result type for real-time operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;
