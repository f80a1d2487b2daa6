//! Real-time WebSocket API for live updates and collaboration sessions.
//!
//! - `/ws` - event stream; clients subscribe to `project:` and `session:` channels
//! - `/ws/sessions/{id}?user=` - joins a collaboration session
//! - `/api/realtime/stats` - connection statistics
//! - `/api/sessions` - create and list sessions
//!
//! ## Event stream protocol
//!
//! ```json
//! {"type": "subscribe", "channel": "project:gearbox"}
//! {"type": "unsubscribe", "channel": "project:gearbox"}
//! {"type": "ping"}
//! ```
//!
//! ## Session protocol
//!
//! On connect the server sends a `welcome` message with the session, the
//! heartbeat interval and the reconnect backoff. Clients then send:
//!
//! ```json
//! {"type": "heartbeat"}
//! {"type": "cursor", "seq": 4, "position": {"x": 1.0, "y": 2.0}}
//! {"type": "viewport", "seq": 2, "viewport": {"position": [0,0,5], "target": [0,0,0], "zoom": 1.0}}
//! {"type": "media", "video": true}
//! {"type": "promote", "user": "bob"}
//! {"type": "pause"} {"type": "resume"} {"type": "end"} {"type": "leave"}
//! ```
//!
//! Closing the socket without `leave` keeps the participant in the session
//! until the heartbeat timeout, so a reconnect with the same user resumes it.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use eng_realtime::{
    ClientCommand, CursorPosition, EventHub, NewSession, ReconnectPolicy, RealtimeError,
    ServerMessage, Session, SessionCoordinator, Viewport,
};
use eng_types::{unix_now_millis, ProjectId, UserId};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::api::{parse_user, ApiError, AppState};

/// Create the real-time API routes.
pub fn realtime_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/ws/sessions/{id}", get(session_ws_handler))
        .route("/api/realtime/stats", get(get_stats))
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/{id}", get(get_session))
}

// ==================== Event stream ====================

/// Optional identity for the event stream.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub user: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = query.user.as_deref().map(parse_user).transpose()?;
    let hub = state.realtime.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, hub, user)))
}

/// Handle an event stream connection.
async fn handle_socket(socket: WebSocket, hub: Arc<EventHub>, user: Option<UserId>) {
    let (client, mut receiver) = match hub.connect(user) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to connect client: {}", e);
            return;
        }
    };

    let client_id = client.id.clone();
    info!(client_id = %client_id, "WebSocket client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let client_id_clone = client_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = receiver.recv().await {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
        debug!(client_id = %client_id_clone, "Send task ended");
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let reply = match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => hub
                        .handle_command(&client, cmd)
                        .unwrap_or_else(|e| ServerMessage::Error {
                            message: e.to_string(),
                        }),
                    Err(e) => {
                        debug!(client_id = %client_id, error = %e, "Invalid message format");
                        ServerMessage::Error {
                            message: format!("Invalid message format: {}", e),
                        }
                    }
                };
                if let Ok(json) = serde_json::to_string(&reply) {
                    let _ = client.send(json);
                }
            }
            Ok(Message::Close(_)) => {
                debug!(client_id = %client_id, "WebSocket close received");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => {
                debug!(client_id = %client_id, "Binary message ignored");
            }
            Err(e) => {
                error!(client_id = %client_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    send_task.abort();
    hub.disconnect(&client_id);
    info!(client_id = %client_id, "WebSocket client disconnected");
}

/// Statistics response.
#[derive(Serialize)]
struct StatsResponse {
    current_connections: usize,
    total_connections: u64,
    total_subscriptions: u64,
    total_events: u64,
    live_sessions: usize,
}

/// Get real-time connection statistics.
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.realtime.stats();
    Json(StatsResponse {
        current_connections: stats.current_connections,
        total_connections: stats.total_connections,
        total_subscriptions: stats.total_subscriptions,
        total_events: stats.total_events,
        live_sessions: state.sessions.live_session_count(),
    })
}

// ==================== Sessions (HTTP) ====================

/// Query parameters for listing sessions.
#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub project: Option<String>,
    #[serde(default)]
    pub include_ended: bool,
}

async fn create_session(
    State(state): State<AppState>,
    Json(new): Json<NewSession>,
) -> Result<impl IntoResponse, ApiError> {
    // Sessions are only started on known projects.
    state.projects.get(&new.project_id)?;
    let session = state.sessions.create_session(new)?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<ListSessionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let project = params.project.map(ProjectId::parse).transpose()?;
    Ok(Json(
        state
            .sessions
            .list_sessions(project.as_ref(), params.include_ended),
    ))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.sessions.get_session(&id)?))
}

// ==================== Sessions (WebSocket) ====================

/// Identity of the joining user.
#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub user: String,
}

/// Messages a session participant sends.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionCommand {
    Heartbeat,
    Cursor {
        seq: u64,
        position: CursorPosition,
    },
    Viewport {
        seq: u64,
        viewport: Viewport,
    },
    Media {
        #[serde(default)]
        video: Option<bool>,
        #[serde(default)]
        audio: Option<bool>,
    },
    Promote {
        user: UserId,
    },
    Pause,
    Resume,
    End,
    Leave,
}

/// Backoff a client should follow when its session connection drops.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconnectAdvice {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl From<&ReconnectPolicy> for ReconnectAdvice {
    fn from(policy: &ReconnectPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            jitter: policy.jitter,
        }
    }
}

/// Direct replies on a session connection. Relayed session events arrive
/// as [`eng_realtime::RealtimeEvent`]s.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionReply {
    Welcome {
        client_id: String,
        session: Session,
        heartbeat_interval_ms: u64,
        reconnect: ReconnectAdvice,
    },
    HeartbeatAck {
        server_time: u64,
    },
    /// Cursor or viewport update not applied.
    Dropped {
        seq: u64,
    },
    Session {
        session: Session,
    },
    Error {
        message: String,
    },
}

/// Whether the connection loop continues.
enum Flow {
    Continue,
    Left,
}

async fn session_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SessionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = parse_user(&query.user)?;
    // Reject unknown or ended sessions before upgrading.
    let session = state.sessions.get_session(&id)?;
    if session.is_ended() {
        return Err(RealtimeError::SessionEnded(id).into());
    }
    Ok(ws.on_upgrade(move |socket| handle_session_socket(socket, state, id, user)))
}

async fn handle_session_socket(socket: WebSocket, state: AppState, id: String, user: UserId) {
    let hub = state.realtime.clone();
    let sessions = state.sessions.clone();

    let (client, mut receiver) = match hub.connect(Some(user.clone())) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to connect client: {}", e);
            return;
        }
    };
    let client_id = client.id.clone();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let session = match sessions.join_session(&id, user.clone(), Some(&client_id)) {
        Ok(session) => session,
        Err(e) => {
            warn!(session = %id, participant = %user, error = %e, "Join rejected");
            if let Ok(json) = serde_json::to_string(&SessionReply::Error {
                message: e.to_string(),
            }) {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender.send(Message::Close(None)).await;
            hub.disconnect(&client_id);
            return;
        }
    };
    info!(session = %id, participant = %user, client_id = %client_id, "Session socket attached");

    let welcome = SessionReply::Welcome {
        client_id: client_id.clone(),
        session,
        heartbeat_interval_ms: sessions.config().heartbeat_interval.as_millis() as u64,
        reconnect: ReconnectAdvice::from(&state.reconnect),
    };
    reply(&client, &welcome);

    let client_id_clone = client_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = receiver.recv().await {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
        debug!(client_id = %client_id_clone, "Send task ended");
    });

    let mut left = false;
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<SessionCommand>(&text) {
                Ok(cmd) => match handle_session_command(&sessions, &client, &id, &user, cmd) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Left) => {
                        left = true;
                        break;
                    }
                    Err(e) => reply(
                        &client,
                        &SessionReply::Error {
                            message: e.to_string(),
                        },
                    ),
                },
                Err(e) => {
                    debug!(client_id = %client_id, error = %e, "Invalid session message");
                    reply(
                        &client,
                        &SessionReply::Error {
                            message: format!("Invalid message format: {}", e),
                        },
                    );
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "Session socket error");
                break;
            }
        }
    }

    if !left {
        sessions.detach(&id, &user, &client_id);
    }
    send_task.abort();
    hub.disconnect(&client_id);
    info!(session = %id, participant = %user, left, "Session socket closed");
}

fn handle_session_command(
    sessions: &SessionCoordinator,
    client: &eng_realtime::Client,
    id: &str,
    user: &UserId,
    cmd: SessionCommand,
) -> Result<Flow, RealtimeError> {
    match cmd {
        SessionCommand::Heartbeat => {
            sessions.heartbeat(id, user)?;
            reply(
                client,
                &SessionReply::HeartbeatAck {
                    server_time: unix_now_millis(),
                },
            );
        }
        SessionCommand::Cursor { seq, position } => {
            if !sessions.update_cursor(id, user, seq, position)? {
                reply(client, &SessionReply::Dropped { seq });
            }
        }
        SessionCommand::Viewport { seq, viewport } => {
            if !sessions.update_viewport(id, user, seq, viewport)? {
                reply(client, &SessionReply::Dropped { seq });
            }
        }
        SessionCommand::Media { video, audio } => {
            sessions.set_media(id, user, video, audio)?;
        }
        SessionCommand::Promote { user: target } => {
            let session = sessions.promote_cohost(id, user, &target)?;
            reply(client, &SessionReply::Session { session });
        }
        SessionCommand::Pause => {
            let session = sessions.pause_session(id, user)?;
            reply(client, &SessionReply::Session { session });
        }
        SessionCommand::Resume => {
            let session = sessions.resume_session(id, user)?;
            reply(client, &SessionReply::Session { session });
        }
        SessionCommand::End => {
            let session = sessions.end_session(id, user)?;
            reply(client, &SessionReply::Session { session });
        }
        SessionCommand::Leave => {
            sessions.leave_session(id, user)?;
            return Ok(Flow::Left);
        }
    }
    Ok(Flow::Continue)
}

fn reply(client: &eng_realtime::Client, message: &SessionReply) {
    match serde_json::to_string(message) {
        Ok(json) => {
            let _ = client.send(json);
        }
        Err(e) => debug!(error = %e, "Dropping unserializable reply"),
    }
}
