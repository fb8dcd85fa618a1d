//! GitLabTracker against a stand-in GitLab API served on a local socket.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use roadmap_sync_lib::models::feature_request::FeatureFields;
use roadmap_sync_lib::services::gitlab_client::{GitLabClient, GitLabClientConfig};
use roadmap_sync_lib::services::retry::RetryPolicy;
use roadmap_sync_lib::services::{GitLabTracker, WorkItemTracker};
use roadmap_sync_lib::time::now_millis;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
struct Calls {
    creates: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
}

async fn create_issue(
    State(calls): State<Calls>,
    Path(_project): Path<String>,
) -> (StatusCode, Json<Value>) {
    calls.creates.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::CREATED,
        Json(json!({
            "iid": 5,
            "title": "Export CSV",
            "description": null,
            "state": "opened",
            "labels": ["status::done", "priority::medium"],
            "updated_at": "2024-03-01T10:00:00Z"
        })),
    )
}

/// Every edit fails as if GitLab were down.
async fn update_issue(
    State(calls): State<Calls>,
    Path((_project, _iid)): Path<(String, i64)>,
) -> StatusCode {
    calls.updates.fetch_add(1, Ordering::SeqCst);
    StatusCode::SERVICE_UNAVAILABLE
}

async fn list_notes(Path((_project, _iid)): Path<(String, i64)>) -> Json<Value> {
    Json(json!([
        { "id": 1, "body": "+1", "author": { "id": 7, "name": "Pat" },
          "created_at": "2024-03-01T10:00:00Z", "system": false },
        { "id": 2, "body": "me too", "author": { "id": 8, "name": "Sam" },
          "created_at": "yesterday", "system": false },
        { "id": 3, "body": "added ~status::done", "author": { "id": 7, "name": "Pat" },
          "created_at": "2024-03-01T10:05:00Z", "system": true }
    ]))
}

async fn fake_gitlab(calls: Calls) -> String {
    let router = Router::new()
        .route("/api/v4/projects/{project}/issues", post(create_issue))
        .route("/api/v4/projects/{project}/issues/{iid}", put(update_issue))
        .route("/api/v4/projects/{project}/issues/{iid}/notes", get(list_notes))
        .with_state(calls);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{}", addr)
}

fn tracker(base_url: String) -> GitLabTracker {
    let client = GitLabClient::new(GitLabClientConfig {
        base_url,
        token: "glpat-test".to_string(),
        timeout_secs: 5,
    })
    .unwrap();

    GitLabTracker::new(
        client,
        "roadmap",
        RetryPolicy {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
            call_timeout_secs: 5,
        },
    )
}

#[tokio::test]
async fn created_issue_id_survives_failed_close() {
    let calls = Calls::default();
    let tracker = tracker(fake_gitlab(calls.clone()).await);

    let fields = FeatureFields {
        title: "Export CSV".to_string(),
        description: String::new(),
        status: "done".to_string(),
        priority: "medium".to_string(),
    };

    let external_id = tracker.create_work_item(&fields).await.unwrap();
    assert_eq!(external_id, "5");
    assert_eq!(calls.creates.load(Ordering::SeqCst), 1);
    // The close was attempted and retried, but it did not cost the id
    assert_eq!(calls.updates.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn comments_skip_system_notes_and_keep_bad_timestamps_recent() {
    let tracker = tracker(fake_gitlab(Calls::default()).await);
    let before = now_millis();

    let comments = tracker.list_comments("5").await.unwrap();
    assert_eq!(comments.len(), 2);

    assert_eq!(comments[0].external_comment_id, "1");
    assert_eq!(comments[0].created_at, 1_709_287_200_000);

    assert_eq!(comments[1].external_comment_id, "2");
    assert!(comments[1].created_at >= before);
}
