//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tower::ServiceExt;

use vmci_core::protocol::{TaskPollResponse, WorkerResponse};
use vmci_core::{Task, TaskShellRecord, TaskState};
use vmci_dispatcher::{create_router, AppState, DispatcherConfig};

fn app() -> (Arc<AppState>, Router) {
    let state = AppState::new(DispatcherConfig::default());
    let router = create_router(state.clone());
    (state, router)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn send_json<T: DeserializeOwned>(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, T) {
    let (status, bytes) = send(router, method, uri, body).await;
    let parsed = serde_json::from_slice(&bytes)
        .unwrap_or_else(|e| panic!("bad body ({e}): {}", String::from_utf8_lossy(&bytes)));
    (status, parsed)
}

async fn create(router: &Router, machine: &str) -> Task {
    let (status, task): (_, Task) = send_json(
        router,
        "POST",
        "/v1/tasks",
        Some(json!({
            "configuration": { "machine": machine, "test_script": "echo hi" },
            "project": "demo",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    task
}

#[tokio::test]
async fn test_health() {
    let (_, router) = app();
    let (status, body): (_, Value) = send_json(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_create_and_get_task() {
    let (_, router) = app();
    let task = create(&router, "ubuntu").await;
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(task.project.as_deref(), Some("demo"));

    let (status, fetched): (_, Task) =
        send_json(&router, "GET", &format!("/v1/tasks/{}", task.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched.id, task.id);

    let (status, listed): (_, Vec<Task>) = send_json(&router, "GET", "/v1/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_create_rejects_empty_machine() {
    let (_, router) = app();
    let (status, body): (_, Value) = send_json(
        &router,
        "POST",
        "/v1/tasks",
        Some(json!({ "configuration": { "machine": " " } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("machine"));
}

#[tokio::test]
async fn test_unknown_task_is_404() {
    let (_, router) = app();

    let (status, body): (_, Value) = send_json(&router, "GET", "/v1/tasks/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _): (_, Value) = send_json(
        &router,
        "POST",
        "/dispatcher/task/update/finish",
        Some(json!({ "task_id": "nope", "exit_code": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _): (_, Value) = send_json(
        &router,
        "POST",
        "/dispatcher/task/update/shell",
        Some(json!({ "worker_id": "w", "task_id": "nope", "index": 0, "output": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_worker_protocol_round() {
    let (state, router) = app();
    let task = create(&router, "ubuntu").await;

    // Lease
    let (status, poll): (_, TaskPollResponse) = send_json(
        &router,
        "POST",
        "/dispatcher/task/poll",
        Some(json!({ "worker_id": "builder-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let leased = poll.task.expect("task should be leased");
    assert_eq!(leased.id, task.id);
    assert_eq!(leased.state, TaskState::Running);
    assert_eq!(leased.worker_id.as_ref().map(|w| w.as_str()), Some("builder-1"));

    // Nothing left
    let (_, poll): (_, TaskPollResponse) = send_json(
        &router,
        "POST",
        "/dispatcher/task/poll",
        Some(json!({ "worker_id": "builder-2" })),
    )
    .await;
    assert!(poll.task.is_none());

    let (status, _): (_, Value) = send_json(
        &router,
        "POST",
        "/dispatcher/task/update/start",
        Some(json!({ "task_id": task.id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    for (index, output) in [(1, "echo a\n"), (1, "echo a\na\n"), (0, "Starting VM...\n")] {
        let (status, _): (_, Value) = send_json(
            &router,
            "POST",
            "/dispatcher/task/update/shell",
            Some(json!({ "worker_id": "builder-1", "task_id": task.id, "index": index, "output": output })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _): (_, Value) = send_json(
        &router,
        "POST",
        "/dispatcher/task/update/finish",
        Some(json!({ "task_id": task.id, "exit_code": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, records): (_, Vec<TaskShellRecord>) =
        send_json(&router, "GET", &format!("/v1/tasks/{}/shell", task.id), None).await;
    let outputs: Vec<(u32, &str)> = records.iter().map(|r| (r.index, r.output.as_str())).collect();
    assert_eq!(outputs, vec![(0, "Starting VM...\n"), (1, "echo a\na\n")]);

    let stored = state.tasks.get(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.state, TaskState::Succeeded);
    assert_eq!(stored.exit_code, Some(0));
    assert!(stored.started_at.is_some());
    assert!(stored.finished_at.is_some());
}

#[tokio::test]
async fn test_finish_with_failure_code() {
    let (state, router) = app();
    let task = create(&router, "ubuntu").await;
    send(&router, "POST", "/dispatcher/task/poll", Some(json!({ "worker_id": "w" }))).await;

    let (status, _) = send(
        &router,
        "POST",
        "/dispatcher/task/update/finish",
        Some(json!({ "task_id": task.id, "exit_code": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let stored = state.tasks.get(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.state, TaskState::Failed);
    assert_eq!(stored.exit_code, Some(3));

    // A second report conflicts with the terminal state.
    let (status, _) = send(
        &router,
        "POST",
        "/dispatcher/task/update/finish",
        Some(json!({ "task_id": task.id, "exit_code": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_keepalive_and_worker_list() {
    let (_, router) = app();

    for _ in 0..2 {
        let (status, _) = send(
            &router,
            "POST",
            "/dispatcher/worker/keepalive",
            Some(json!({ "worker_id": "builder-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, workers): (_, Vec<WorkerResponse>) =
        send_json(&router, "GET", "/v1/workers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].worker_id.as_str(), "builder-1");
    assert!(workers[0].alive);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (_, router) = app();
    create(&router, "ubuntu").await;

    let (status, body) = send(&router, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("vmci_tasks{state=\"pending\"} 1"));
}

#[tokio::test]
async fn test_events_are_published() {
    let (state, router) = app();
    let mut events = state.events.subscribe();

    let task = create(&router, "ubuntu").await;
    send(&router, "POST", "/dispatcher/task/poll", Some(json!({ "worker_id": "w" }))).await;

    let created = events.recv().await.unwrap();
    assert_eq!(created.task_id, task.id);
    assert_eq!(created.kind, vmci_core::TaskEventKind::Created);
    assert_eq!(events.recv().await.unwrap().kind, vmci_core::TaskEventKind::Dispatched);
}
