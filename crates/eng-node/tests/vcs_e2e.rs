//! End-to-end tests for the version-control endpoints.

use axum::{body::Body, http::Request};
use eng_node::api::{create_router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn create_test_app() -> axum::Router {
    create_router(AppState::in_memory())
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (u16, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status().as_u16();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

async fn create_project(app: &axum::Router) -> u64 {
    let (status, body) = send(
        app,
        "POST",
        "/api/projects/gearbox",
        Some(json!({"author": "alice"})),
    )
    .await;
    assert_eq!(status, 201);
    body["default_branch"]["id"].as_u64().unwrap()
}

#[tokio::test]
async fn test_create_project_and_list_branches() {
    let app = create_test_app();
    let main = create_project(&app).await;

    let request = Request::builder()
        .method("GET")
        .uri("/api/projects/gearbox/branches")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), 200);

    let branches = json_body(response).await;
    let branches = branches.as_array().unwrap();
    assert_eq!(branches.len(), 1);
    assert_eq!(branches[0]["id"], main);
    assert_eq!(branches[0]["name"], "main");
    assert_eq!(branches[0]["is_default"], true);

    // A second init is a conflict.
    let (status, body) = send(
        &app,
        "POST",
        "/api/projects/gearbox",
        Some(json!({"author": "alice"})),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["kind"], "conflict");

    let (status, projects) = send(&app, "GET", "/api/projects", None).await;
    assert_eq!(status, 200);
    assert_eq!(projects, json!(["gearbox"]));
}

#[tokio::test]
async fn test_unknown_project_and_bad_identifier() {
    let app = create_test_app();

    let (status, body) = send(&app, "GET", "/api/projects/rover/branches", None).await;
    assert_eq!(status, 404);
    assert_eq!(body["kind"], "not_found");

    let (status, body) = send(
        &app,
        "POST",
        "/api/projects/gearbox",
        Some(json!({"author": ""})),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn test_commit_history_and_read_file() {
    let app = create_test_app();
    let main = create_project(&app).await;

    let (status, commit) = send(
        &app,
        "POST",
        &format!("/api/projects/gearbox/branches/{}/commits", main),
        Some(json!({
            "author": "alice",
            "message": "Add housing",
            "changes": [
                {"op": "put", "path": "notes.txt", "content": "bore 12mm\n"},
                {"op": "put", "path": "housing.step", "content": "AAEC/w==", "encoding": "base64"}
            ]
        })),
    )
    .await;
    assert_eq!(status, 201);
    let commit_id = commit["id"].as_str().unwrap().to_string();
    assert_eq!(commit["file_changes"].as_array().unwrap().len(), 2);

    let (status, history) = send(
        &app,
        "GET",
        &format!("/api/projects/gearbox/branches/{}/history?limit=10", main),
        None,
    )
    .await;
    assert_eq!(status, 200);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["id"], commit_id.as_str());
    assert_eq!(history[1]["message"], "Initialize repository");

    let (status, file) = send(
        &app,
        "GET",
        &format!("/api/projects/gearbox/commits/{}/files/notes.txt", commit_id),
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(file["content"], "bore 12mm\n");
    assert_eq!(file["encoding"], "utf8");

    let (status, file) = send(
        &app,
        "GET",
        &format!("/api/projects/gearbox/commits/{}/files/housing.step", commit_id),
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(file["content"], "AAEC/w==");
    assert_eq!(file["encoding"], "base64");
    assert_eq!(file["size"], 4);
}

#[tokio::test]
async fn test_stale_expected_head_is_rejected() {
    let app = create_test_app();
    let main = create_project(&app).await;
    let uri = format!("/api/projects/gearbox/branches/{}/commits", main);

    let (_, first) = send(
        &app,
        "POST",
        &uri,
        Some(json!({
            "author": "alice",
            "message": "One",
            "changes": [{"op": "put", "path": "a.txt", "content": "1"}]
        })),
    )
    .await;
    let (_, history) = send(
        &app,
        "GET",
        &format!("/api/projects/gearbox/branches/{}/history", main),
        None,
    )
    .await;
    let root = history[1]["id"].as_str().unwrap().to_string();
    assert_ne!(first["id"], root.as_str());

    let (status, body) = send(
        &app,
        "POST",
        &uri,
        Some(json!({
            "author": "bob",
            "message": "Two",
            "changes": [{"op": "put", "path": "a.txt", "content": "2"}],
            "expected_head": root
        })),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["kind"], "conflict");
}

#[tokio::test]
async fn test_protected_branch_rejects_direct_commit() {
    let app = create_test_app();
    let main = create_project(&app).await;

    let (status, branch) = send(
        &app,
        "PUT",
        &format!("/api/projects/gearbox/branches/{}/protection", main),
        Some(json!({"require_pull_request": true, "required_approvals": 1})),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(branch["protection_rules"]["require_pull_request"], true);
    // Unspecified rules take their defaults.
    assert_eq!(branch["protection_rules"]["allow_deletion"], true);
    assert!(branch["protection_rules"].get("allow_force_push").is_none());

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/projects/gearbox/branches/{}/commits", main),
        Some(json!({
            "author": "alice",
            "message": "Sneak in",
            "changes": [{"op": "put", "path": "a.txt", "content": "x"}]
        })),
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(body["kind"], "protection");
}

#[tokio::test]
async fn test_branch_merge_diff_and_merge_base() {
    let app = create_test_app();
    let main = create_project(&app).await;

    let (_, base) = send(
        &app,
        "POST",
        &format!("/api/projects/gearbox/branches/{}/commits", main),
        Some(json!({
            "author": "alice",
            "message": "Base",
            "changes": [{"op": "put", "path": "spec.txt", "content": "a\nb\nc\n"}]
        })),
    )
    .await;
    let base_id = base["id"].as_str().unwrap().to_string();

    let (status, feature) = send(
        &app,
        "POST",
        "/api/projects/gearbox/branches",
        Some(json!({"name": "feature/bore", "created_by": "bob"})),
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(feature["head_commit_id"], base_id.as_str());
    let feature_id = feature["id"].as_u64().unwrap();

    let (_, edit) = send(
        &app,
        "POST",
        &format!("/api/projects/gearbox/branches/{}/commits", feature_id),
        Some(json!({
            "author": "bob",
            "message": "Add gear",
            "changes": [{"op": "put", "path": "gear.txt", "content": "teeth: 24\n"}]
        })),
    )
    .await;
    let edit_id = edit["id"].as_str().unwrap().to_string();

    let (status, diff) = send(
        &app,
        "GET",
        &format!("/api/projects/gearbox/diff?from={}&to={}", base_id, edit_id),
        None,
    )
    .await;
    assert_eq!(status, 200);
    let diff = diff.as_array().unwrap();
    assert_eq!(diff.len(), 1);
    assert_eq!(diff[0]["path"], "gear.txt");

    let (status, merge_base) = send(
        &app,
        "GET",
        &format!("/api/projects/gearbox/merge-base?a={}&b={}", base_id, edit_id),
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(merge_base["id"], base_id.as_str());

    let (status, merged) = send(
        &app,
        "POST",
        "/api/projects/gearbox/merges",
        Some(json!({"source": feature_id, "target": main, "author": "alice"})),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(merged["parents"].as_array().unwrap().len(), 2);

    let (status, branches) = send(
        &app,
        "GET",
        "/api/projects/gearbox/branches?include_deleted=true",
        None,
    )
    .await;
    assert_eq!(status, 200);
    let feature = branches
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["name"] == "feature/bore")
        .unwrap()
        .clone();
    assert_eq!(feature["status"], "merged");
}

#[tokio::test]
async fn test_tags_lifecycle() {
    let app = create_test_app();
    let main = create_project(&app).await;
    let (_, history) = send(
        &app,
        "GET",
        &format!("/api/projects/gearbox/branches/{}/history", main),
        None,
    )
    .await;
    let root = history[0]["id"].as_str().unwrap().to_string();

    let (status, tag) = send(
        &app,
        "POST",
        "/api/projects/gearbox/tags",
        Some(json!({
            "name": "v1.0.0-beta.1",
            "commit_id": root,
            "tag_type": "release",
            "created_by": "alice"
        })),
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(tag["is_prerelease"], true);
    assert_eq!(tag["download_count"], 0);

    let (status, _) = send(
        &app,
        "POST",
        "/api/projects/gearbox/tags",
        Some(json!({"name": "v1.0.0-beta.1", "commit_id": root, "tag_type": "release"})),
    )
    .await;
    assert_eq!(status, 409);

    let (status, tag) = send(
        &app,
        "POST",
        "/api/projects/gearbox/tags/v1.0.0-beta.1/downloads",
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(tag["download_count"], 1);

    let (status, _) = send(&app, "DELETE", "/api/projects/gearbox/tags/v1.0.0-beta.1", None).await;
    assert_eq!(status, 200);

    let (status, tags) = send(&app, "GET", "/api/projects/gearbox/tags", None).await;
    assert_eq!(status, 200);
    assert!(tags.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_health_reports_projects() {
    let app = create_test_app();
    create_project(&app).await;

    let (status, health) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, 200);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["projects"], 1);
}
