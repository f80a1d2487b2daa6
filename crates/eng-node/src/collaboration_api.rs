//! # Collaboration API
//!
//! HTTP endpoints for pull requests and reviews.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/api/projects/{project}/pulls` | List pull requests |
//! | POST | `/api/projects/{project}/pulls` | Open a pull request |
//! | GET | `/api/projects/{project}/pulls/{number}` | Get PR details, conflicts refreshed |
//! | POST | `/api/projects/{project}/pulls/{number}/merge` | Merge the PR |
//! | POST | `/api/projects/{project}/pulls/{number}/close` | Close without merging |
//! | POST | `/api/projects/{project}/pulls/{number}/resolutions` | Resolve one conflicting path |
//! | POST | `/api/projects/{project}/pulls/{number}/reviewers` | Request a review |
//! | GET | `/api/projects/{project}/pulls/{number}/reviews` | List reviews |
//! | POST | `/api/projects/{project}/pulls/{number}/reviews` | Submit a review |
//! | POST | `/api/projects/{project}/reviews/{id}/dismiss` | Dismiss a review |
//!
//! ## State Transitions
//!
//! ```text
//! Open ──┬──> Closed (terminal)
//!        └──> Merged (terminal)
//! ```
//!
//! A missing title, source or target branch is answered with
//! `422 Unprocessable Entity` listing every absent field.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use eng_collaboration::{NewPullRequest, PullRequestState, ReviewState};
use eng_vcs::MergeMethod;
use serde::Deserialize;

use crate::api::{parse_user, ApiError, AppState};
use crate::vcs_api::ResolutionRequest;

/// Creates the collaboration API routes.
pub fn collaboration_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/projects/{project}/pulls",
            get(list_prs).post(create_pr),
        )
        .route("/api/projects/{project}/pulls/{number}", get(get_pr))
        .route("/api/projects/{project}/pulls/{number}/merge", post(merge_pr))
        .route("/api/projects/{project}/pulls/{number}/close", post(close_pr))
        .route(
            "/api/projects/{project}/pulls/{number}/resolutions",
            post(resolve_conflict),
        )
        .route(
            "/api/projects/{project}/pulls/{number}/reviewers",
            post(request_review),
        )
        .route(
            "/api/projects/{project}/pulls/{number}/reviews",
            get(list_reviews).post(create_review),
        )
        .route(
            "/api/projects/{project}/reviews/{id}/dismiss",
            post(dismiss_review),
        )
}

// ==================== Request Types ====================

/// Query parameters for listing pull requests.
#[derive(Debug, Deserialize)]
pub struct ListPullRequestsQuery {
    pub state: Option<PullRequestState>,
}

/// Request to open a pull request.
#[derive(Debug, Deserialize)]
pub struct CreatePullRequestRequest {
    pub author: String,
    #[serde(flatten)]
    pub pull_request: NewPullRequest,
}

/// Request to merge a pull request.
#[derive(Debug, Deserialize)]
pub struct MergePullRequestRequest {
    pub merged_by: String,
    #[serde(default)]
    pub method: MergeMethod,
}

/// Request to resolve one conflicting path.
#[derive(Debug, Deserialize)]
pub struct ResolveConflictRequest {
    pub path: String,
    #[serde(flatten)]
    pub resolution: ResolutionRequest,
}

/// Request to ask a user for a review.
#[derive(Debug, Deserialize)]
pub struct RequestReviewRequest {
    pub reviewer: String,
}

/// Request to submit a review.
#[derive(Debug, Deserialize)]
pub struct CreateReviewRequest {
    pub author: String,
    pub state: ReviewState,
    pub body: Option<String>,
}

// ==================== Pull Request Handlers ====================

async fn list_prs(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(params): Query<ListPullRequestsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    Ok(Json(
        state
            .collaboration
            .list_pull_requests(repo.project_id(), params.state),
    ))
}

async fn create_pr(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(req): Json<CreatePullRequestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    let author = parse_user(&req.author)?;
    let pr = state
        .collaboration
        .create_pull_request(&repo, author, req.pull_request)?;
    Ok((StatusCode::CREATED, Json(pr)))
}

async fn get_pr(
    State(state): State<AppState>,
    Path((project, number)): Path<(String, u32)>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    let pr = state.collaboration.get_pull_request(repo.project_id(), number)?;
    if !pr.is_open() {
        return Ok(Json(pr));
    }
    Ok(Json(state.collaboration.refresh(&repo, number)?))
}

async fn merge_pr(
    State(state): State<AppState>,
    Path((project, number)): Path<(String, u32)>,
    Json(req): Json<MergePullRequestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    let merged_by = parse_user(&req.merged_by)?;
    let pr = state
        .collaboration
        .merge_pull_request(&repo, number, merged_by, req.method)?;
    Ok(Json(pr))
}

async fn close_pr(
    State(state): State<AppState>,
    Path((project, number)): Path<(String, u32)>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    Ok(Json(
        state
            .collaboration
            .close_pull_request(repo.project_id(), number)?,
    ))
}

async fn resolve_conflict(
    State(state): State<AppState>,
    Path((project, number)): Path<(String, u32)>,
    Json(req): Json<ResolveConflictRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    let resolution = req.resolution.into_resolution(&repo)?;
    let pr = state
        .collaboration
        .resolve_conflict(&repo, number, &req.path, resolution)?;
    Ok(Json(pr))
}

// ==================== Review Handlers ====================

async fn request_review(
    State(state): State<AppState>,
    Path((project, number)): Path<(String, u32)>,
    Json(req): Json<RequestReviewRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    let reviewer = parse_user(&req.reviewer)?;
    Ok(Json(state.collaboration.request_review(
        repo.project_id(),
        number,
        reviewer,
    )?))
}

async fn list_reviews(
    State(state): State<AppState>,
    Path((project, number)): Path<(String, u32)>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    // Surface a 404 for unknown pull requests rather than an empty list.
    state.collaboration.get_pull_request(repo.project_id(), number)?;
    Ok(Json(
        state.collaboration.list_reviews(repo.project_id(), number),
    ))
}

async fn create_review(
    State(state): State<AppState>,
    Path((project, number)): Path<(String, u32)>,
    Json(req): Json<CreateReviewRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    let author = parse_user(&req.author)?;
    let review = state
        .collaboration
        .submit_review(&repo, number, author, req.state, req.body)?;
    Ok((StatusCode::CREATED, Json(review)))
}

async fn dismiss_review(
    State(state): State<AppState>,
    Path((project, id)): Path<(String, u64)>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    let review = state.collaboration.get_review(id)?;
    if &review.project_id != repo.project_id() {
        return Err(eng_collaboration::CollaborationError::ReviewNotFound { id }.into());
    }
    Ok(Json(state.collaboration.dismiss_review(id)?))
}
