//! # Version Control API
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/api/projects/{project}` | Initialize a project |
//! | GET | `/api/projects/{project}/branches` | List branches |
//! | POST | `/api/projects/{project}/branches` | Create a branch |
//! | DELETE | `/api/projects/{project}/branches/{id}` | Soft-delete a branch |
//! | PUT | `/api/projects/{project}/branches/{id}/protection` | Replace protection rules |
//! | POST | `/api/projects/{project}/branches/{id}/commits` | Commit to a branch |
//! | GET | `/api/projects/{project}/branches/{id}/history` | Branch history |
//! | GET | `/api/projects/{project}/commits/{commit}/files/{*path}` | Read a file |
//! | POST | `/api/projects/{project}/merges` | Merge two branches |
//! | GET | `/api/projects/{project}/merge-base?a=&b=` | Nearest common ancestor |
//! | GET | `/api/projects/{project}/diff?from=&to=` | File changes between commits |
//! | GET | `/api/projects/{project}/tags` | List tags |
//! | POST | `/api/projects/{project}/tags` | Create a tag |
//! | DELETE | `/api/projects/{project}/tags/{name}` | Delete a tag |
//! | POST | `/api/projects/{project}/tags/{name}/downloads` | Count a download |
//!
//! ## Example: Committing a file
//!
//! ```bash
//! curl -X POST http://localhost:8080/api/projects/gearbox/branches/1/commits \
//!   -H "Content-Type: application/json" \
//!   -d '{
//!     "author": "alice",
//!     "message": "Widen bore",
//!     "changes": [
//!       {"op": "put", "path": "housing.step", "content": "SVNPLTEwMzAz", "encoding": "base64"}
//!     ]
//!   }'
//! ```

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use eng_storage::ContentId;
use eng_types::ProjectId;
use eng_vcs::{
    BranchId, Change, CommitRequest, MergeMethod, MergeOptions, NewTag, ProtectionRules,
    Resolution, TagType,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::api::{parse_user, ApiError, AppState, ContentEncoding};
use crate::events::forward_repository;

/// Creates the version-control API routes.
pub fn vcs_routes() -> Router<AppState> {
    Router::new()
        .route("/api/projects", get(list_projects))
        .route("/api/projects/{project}", post(create_project))
        .route(
            "/api/projects/{project}/branches",
            get(list_branches).post(create_branch),
        )
        .route("/api/projects/{project}/branches/{id}", delete(delete_branch))
        .route(
            "/api/projects/{project}/branches/{id}/protection",
            put(set_protection),
        )
        .route(
            "/api/projects/{project}/branches/{id}/commits",
            post(create_commit),
        )
        .route(
            "/api/projects/{project}/branches/{id}/history",
            get(get_history),
        )
        .route(
            "/api/projects/{project}/commits/{commit}/files/{*path}",
            get(read_file),
        )
        .route("/api/projects/{project}/merges", post(merge_branches))
        .route("/api/projects/{project}/merge-base", get(merge_base))
        .route("/api/projects/{project}/diff", get(diff))
        .route(
            "/api/projects/{project}/tags",
            get(list_tags).post(create_tag),
        )
        .route("/api/projects/{project}/tags/{name}", delete(delete_tag))
        .route(
            "/api/projects/{project}/tags/{name}/downloads",
            post(record_download),
        )
}

// ==================== Request/Response Types ====================

/// Request to initialize a project.
#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub author: String,
}

/// Response for a project.
#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub project_id: ProjectId,
    pub default_branch: eng_vcs::Branch,
}

/// Query parameters for listing branches.
#[derive(Debug, Deserialize)]
pub struct ListBranchesQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

/// Request to create a branch.
#[derive(Debug, Deserialize)]
pub struct CreateBranchRequest {
    pub name: String,
    /// Branch to fork from; the default branch when absent.
    pub from: Option<BranchId>,
    pub created_by: Option<String>,
}

/// One edit in a commit request.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FileEdit {
    Put {
        path: String,
        content: String,
        #[serde(default)]
        encoding: ContentEncoding,
    },
    Delete {
        path: String,
    },
    Rename {
        from: String,
        to: String,
    },
}

impl FileEdit {
    fn into_change(self) -> Result<Change, ApiError> {
        Ok(match self {
            FileEdit::Put {
                path,
                content,
                encoding,
            } => Change::put(path, encoding.decode(&content)?),
            FileEdit::Delete { path } => Change::delete(path),
            FileEdit::Rename { from, to } => Change::rename(from, to),
        })
    }
}

/// Request to create a commit.
#[derive(Debug, Deserialize)]
pub struct CreateCommitRequest {
    pub author: String,
    pub message: String,
    pub changes: Vec<FileEdit>,
    /// Head the changes were based on.
    pub expected_head: Option<ContentId>,
}

/// Query parameters for history.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// A file's content at a commit.
#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub path: String,
    pub commit: ContentId,
    pub size: usize,
    pub content: String,
    pub encoding: ContentEncoding,
}

/// Human decision for one path in a merge request.
#[derive(Debug, Deserialize)]
pub struct ResolutionRequest {
    /// New content; omitted with `delete: true` to remove the path.
    pub content: Option<String>,
    #[serde(default)]
    pub encoding: ContentEncoding,
    #[serde(default)]
    pub delete: bool,
}

impl ResolutionRequest {
    /// Stores any resolved content and returns the resolution.
    pub fn into_resolution(self, repo: &eng_vcs::Repository) -> Result<Resolution, ApiError> {
        match (self.delete, self.content) {
            (true, None) => Ok(Resolution::Delete),
            (false, Some(content)) => {
                let bytes = self.encoding.decode(&content)?;
                Ok(Resolution::Content(repo.store().put(bytes)?))
            }
            _ => Err(ApiError::BadRequest(
                "a resolution needs either content or delete: true".into(),
            )),
        }
    }
}

/// Request to merge two branches directly.
#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub source: BranchId,
    pub target: BranchId,
    pub author: String,
    #[serde(default)]
    pub method: MergeMethod,
    pub message: Option<String>,
    #[serde(default)]
    pub resolutions: BTreeMap<String, ResolutionRequest>,
}

/// Query parameters for merge-base.
#[derive(Debug, Deserialize)]
pub struct MergeBaseQuery {
    pub a: ContentId,
    pub b: ContentId,
}

/// Query parameters for diff.
#[derive(Debug, Deserialize)]
pub struct DiffQuery {
    pub from: ContentId,
    pub to: ContentId,
}

/// Request to create a tag.
#[derive(Debug, Deserialize)]
pub struct CreateTagRequest {
    pub name: String,
    pub commit_id: ContentId,
    pub tag_type: TagType,
    pub is_prerelease: Option<bool>,
    pub message: Option<String>,
    pub created_by: Option<String>,
}

// ==================== Project Handlers ====================

/// Lists initialized projects.
async fn list_projects(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.projects.list())
}

/// Initializes a project with a `main` branch.
async fn create_project(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let project = ProjectId::parse(project)?;
    let author = parse_user(&req.author)?;
    let repo = state.projects.create(project.clone(), author)?;
    forward_repository(&state, repo.clone());

    Ok((
        StatusCode::CREATED,
        Json(ProjectResponse {
            project_id: project,
            default_branch: repo.default_branch()?,
        }),
    ))
}

// ==================== Branch Handlers ====================

/// Lists branches.
async fn list_branches(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(params): Query<ListBranchesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    Ok(Json(repo.list_branches(params.include_deleted)))
}

/// Creates a branch.
async fn create_branch(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(req): Json<CreateBranchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    let from = match req.from {
        Some(id) => id,
        None => repo.default_branch()?.id,
    };
    let created_by = req.created_by.as_deref().map(parse_user).transpose()?;
    let branch = repo.create_branch(&req.name, from, created_by)?;
    Ok((StatusCode::CREATED, Json(branch)))
}

/// Soft-deletes a branch.
async fn delete_branch(
    State(state): State<AppState>,
    Path((project, id)): Path<(String, BranchId)>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    Ok(Json(repo.delete_branch(id)?))
}

/// Replaces a branch's protection rules.
async fn set_protection(
    State(state): State<AppState>,
    Path((project, id)): Path<(String, BranchId)>,
    Json(rules): Json<ProtectionRules>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    Ok(Json(repo.set_branch_protection(id, rules)?))
}

/// Creates a commit on a branch.
async fn create_commit(
    State(state): State<AppState>,
    Path((project, id)): Path<(String, BranchId)>,
    Json(req): Json<CreateCommitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    let changes = req
        .changes
        .into_iter()
        .map(FileEdit::into_change)
        .collect::<Result<Vec<_>, _>>()?;

    let mut request = CommitRequest::new(parse_user(&req.author)?, req.message, changes);
    request.expected_head = req.expected_head;
    let commit = repo.create_commit(id, request)?;
    Ok((StatusCode::CREATED, Json(commit)))
}

/// Branch history, newest first.
async fn get_history(
    State(state): State<AppState>,
    Path((project, id)): Path<(String, BranchId)>,
    Query(params): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    Ok(Json(repo.get_history(id, params.limit, params.offset)?))
}

/// Reads a file as of a commit.
async fn read_file(
    State(state): State<AppState>,
    Path((project, commit, path)): Path<(String, ContentId, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    let bytes = repo.read_file(&commit, &path)?;
    let (content, encoding) = ContentEncoding::encode(&bytes);
    Ok(Json(FileResponse {
        path,
        commit,
        size: bytes.len(),
        content,
        encoding,
    }))
}

// ==================== Merge Handlers ====================

/// Merges one branch into another without a pull request.
async fn merge_branches(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(req): Json<MergeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    let mut options = MergeOptions::new(parse_user(&req.author)?).method(req.method);
    options.message = req.message;
    for (path, resolution) in req.resolutions {
        options = options.resolve(path, resolution.into_resolution(&repo)?);
    }

    let commit = repo.merge_branch(req.source, req.target, options)?;
    Ok(Json(commit))
}

/// Nearest common ancestor of two commits.
async fn merge_base(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(params): Query<MergeBaseQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    Ok(Json(repo.find_merge_base(&params.a, &params.b)?))
}

/// File changes between two commits.
async fn diff(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(params): Query<DiffQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    Ok(Json(repo.diff(&params.from, &params.to)?))
}

// ==================== Tag Handlers ====================

/// Lists tags.
async fn list_tags(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    Ok(Json(repo.list_tags()))
}

/// Creates a tag.
async fn create_tag(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(req): Json<CreateTagRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    let mut new = NewTag::new(req.name, req.commit_id, req.tag_type);
    new.is_prerelease = req.is_prerelease;
    new.message = req.message;
    new.created_by = req.created_by.as_deref().map(parse_user).transpose()?;
    Ok((StatusCode::CREATED, Json(repo.create_tag(new)?)))
}

/// Deletes a tag.
async fn delete_tag(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    Ok(Json(repo.delete_tag(&name)?))
}

/// Counts a download of a tagged release.
async fn record_download(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.repo(&project)?;
    Ok(Json(repo.record_download(&name)?))
}
