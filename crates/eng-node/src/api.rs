//! HTTP API for the eng node.
//!
//! Shared state, the error-to-response mapping and the top-level router.
//! Endpoint groups live in [`crate::vcs_api`], [`crate::collaboration_api`]
//! and [`crate::realtime_api`].

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use eng_collaboration::{CollaborationError, CollaborationStore};
use eng_realtime::{EventHub, ReconnectPolicy, RealtimeError, SessionCoordinator};
use eng_storage::StorageError;
use eng_types::{ErrorKind, InvalidIdentifier, ProjectId, UserId};
use eng_vcs::{Repository, VcsError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::collaboration_api::collaboration_routes;
use crate::config::RealtimeConfig;
use crate::projects::ProjectRegistry;
use crate::realtime_api::realtime_routes;
use crate::vcs_api::vcs_routes;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Project repositories.
    pub projects: Arc<ProjectRegistry>,
    /// Pull requests and reviews.
    pub collaboration: Arc<CollaborationStore>,
    /// WebSocket connections and event fan-out.
    pub realtime: Arc<EventHub>,
    /// Live collaboration sessions.
    pub sessions: Arc<SessionCoordinator>,
    /// Backoff advertised to session clients.
    pub reconnect: ReconnectPolicy,
}

impl AppState {
    /// Builds the state around a project registry.
    pub fn new(projects: ProjectRegistry, realtime: &RealtimeConfig) -> Self {
        let hub = Arc::new(EventHub::new());
        Self {
            projects: Arc::new(projects),
            collaboration: Arc::new(CollaborationStore::new()),
            sessions: Arc::new(SessionCoordinator::new(hub.clone(), realtime.coordinator())),
            realtime: hub,
            reconnect: realtime.reconnect_policy(),
        }
    }

    /// In-memory state with default settings.
    pub fn in_memory() -> Self {
        Self::new(
            ProjectRegistry::in_memory(Default::default()),
            &RealtimeConfig::default(),
        )
    }

    /// Looks up a project's repository by its raw path segment.
    pub fn repo(&self, project: &str) -> Result<Arc<Repository>, ApiError> {
        self.projects.get(&ProjectId::parse(project)?)
    }
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("project already exists: {0}")]
    ProjectExists(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Vcs(#[from] VcsError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Collaboration(#[from] CollaborationError),
    #[error(transparent)]
    Realtime(#[from] RealtimeError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<InvalidIdentifier> for ApiError {
    fn from(err: InvalidIdentifier) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl ApiError {
    /// Classification used for the status code and the `kind` field.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::ProjectNotFound(_) => ErrorKind::NotFound,
            ApiError::ProjectExists(_) => ErrorKind::Conflict,
            ApiError::BadRequest(_) => ErrorKind::Validation,
            ApiError::Vcs(e) => e.kind(),
            ApiError::Storage(e) => e.kind(),
            ApiError::Collaboration(e) => e.kind(),
            ApiError::Realtime(e) => e.kind(),
            ApiError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        if matches!(
            self,
            ApiError::Collaboration(CollaborationError::MissingFields { .. })
        ) {
            return StatusCode::UNPROCESSABLE_ENTITY;
        }
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Protection => StatusCode::FORBIDDEN,
            ErrorKind::Transport => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                kind: self.kind(),
            }),
        )
            .into_response()
    }
}

/// Error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
}

/// How file content is carried in JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    /// Plain UTF-8 text.
    #[default]
    Utf8,
    /// Standard base64.
    Base64,
}

impl ContentEncoding {
    /// Decodes request content.
    pub fn decode(self, content: &str) -> Result<Vec<u8>, ApiError> {
        match self {
            ContentEncoding::Utf8 => Ok(content.as_bytes().to_vec()),
            ContentEncoding::Base64 => STANDARD
                .decode(content)
                .map_err(|e| ApiError::BadRequest(format!("invalid base64 content: {}", e))),
        }
    }

    /// Encodes response content, as text when it is valid UTF-8.
    pub fn encode(bytes: &[u8]) -> (String, ContentEncoding) {
        match std::str::from_utf8(bytes) {
            Ok(text) => (text.to_string(), ContentEncoding::Utf8),
            Err(_) => (STANDARD.encode(bytes), ContentEncoding::Base64),
        }
    }
}

/// Parses a user handle from a request field.
pub fn parse_user(value: &str) -> Result<UserId, ApiError> {
    Ok(UserId::parse(value)?)
}

/// Creates the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(vcs_routes())
        .merge(collaboration_routes())
        .merge(realtime_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "projects": state.projects.list().len(),
        "connections": state.realtime.connection_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::ProjectNotFound("x".into()), 404),
            (ApiError::ProjectExists("x".into()), 409),
            (ApiError::BadRequest("x".into()), 400),
            (
                ApiError::Vcs(VcsError::BranchProtected {
                    branch: "main".into(),
                    reason: "requires a pull request".into(),
                }),
                403,
            ),
            (
                ApiError::Collaboration(CollaborationError::MissingFields {
                    fields: vec!["title"],
                }),
                422,
            ),
            (
                ApiError::Realtime(RealtimeError::SessionFull {
                    session: "s".into(),
                    max: 2,
                }),
                409,
            ),
            (ApiError::Internal("x".into()), 500),
        ];
        for (err, status) in cases {
            assert_eq!(err.status().as_u16(), status, "{err}");
        }
    }

    #[test]
    fn test_content_encoding() {
        assert_eq!(ContentEncoding::Utf8.decode("abc").unwrap(), b"abc");
        assert_eq!(ContentEncoding::Base64.decode("AAEC").unwrap(), vec![0, 1, 2]);
        assert!(ContentEncoding::Base64.decode("!!").is_err());

        assert_eq!(
            ContentEncoding::encode(b"text"),
            ("text".to_string(), ContentEncoding::Utf8)
        );
        assert_eq!(
            ContentEncoding::encode(&[0xff, 0x00]),
            ("/wA=".to_string(), ContentEncoding::Base64)
        );
    }
}
