//! End-to-end tests of the HTTP surface: submission, backend updates through
//! `PATCH /api/jobs/:id`, and the image proxy's allow-list gate.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use jobwatch_orchestrator::{
    create_router, AppState, Config, ErrorKind, MemoryJobStore, Phase, Submitted, UiState,
    INVALID_URL_MESSAGE,
};
use jobwatch_proxy::router_from_config;
use serde_json::{json, Value};

const IMAGE_URL: &str = "https://media.licdn.com/dms/image/profile.jpg";

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Spawns the full server (API, `/ws` and proxy) and returns its base URL.
async fn spawn_server(store: Arc<MemoryJobStore>) -> String {
    let config = Config::default();
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");

    let proxy = router_from_config(&config).expect("Failed to build proxy");
    let router = create_router(AppState::new(config, store)).merge(proxy);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://{addr}")
}

async fn submit(client: &reqwest::Client, base: &str, url: &str) -> reqwest::Response {
    client
        .post(format!("{base}/api/submit"))
        .json(&json!({ "url": url }))
        .send()
        .await
        .expect("Submit request failed")
}

async fn patch_job(client: &reqwest::Client, base: &str, id: &str, body: Value) {
    let response = client
        .patch(format!("{base}/api/jobs/{id}"))
        .json(&body)
        .send()
        .await
        .expect("Patch request failed");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}

async fn status(client: &reqwest::Client, base: &str) -> UiState {
    client
        .get(format!("{base}/api/status"))
        .send()
        .await
        .expect("Status request failed")
        .json()
        .await
        .expect("Failed to parse state")
}

/// Polls `/api/status` until the phase matches or a second has passed.
async fn wait_for_phase(client: &reqwest::Client, base: &str, phase: Phase) -> UiState {
    for _ in 0..50 {
        let state = status(client, base).await;
        if state.phase == phase {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    status(client, base).await
}

// ============================================================================
// Submission Flow
// ============================================================================

#[tokio::test]
async fn test_submit_then_backend_success_renders_result() {
    let base = spawn_server(Arc::new(MemoryJobStore::new())).await;
    let client = reqwest::Client::new();

    let response = submit(&client, &base, IMAGE_URL).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let submitted: Submitted = response.json().await.expect("Failed to parse submission");
    assert_eq!(submitted.state.phase, Phase::Waiting);
    assert_eq!(submitted.job.url, IMAGE_URL);

    let id = submitted.job.id.to_string();
    patch_job(&client, &base, &id, json!({ "status": "processing" })).await;
    patch_job(
        &client,
        &base,
        &id,
        json!({ "status": "succeeded", "result": "Senior Rust Engineer" }),
    )
    .await;

    let state = wait_for_phase(&client, &base, Phase::Succeeded).await;
    assert_eq!(state.phase, Phase::Succeeded);
    assert_eq!(state.display_result.as_deref(), Some("Senior Rust Engineer"));
    assert_eq!(state.display_url.as_deref(), Some(IMAGE_URL));
    assert!(state.display_error.is_none());
}

#[tokio::test]
async fn test_backend_failure_renders_processing_error() {
    let base = spawn_server(Arc::new(MemoryJobStore::new())).await;
    let client = reqwest::Client::new();

    let submitted: Submitted = submit(&client, &base, IMAGE_URL)
        .await
        .json()
        .await
        .expect("Failed to parse submission");

    patch_job(
        &client,
        &base,
        &submitted.job.id.to_string(),
        json!({ "status": "failed", "errorMessage": "image unreadable" }),
    )
    .await;

    let state = wait_for_phase(&client, &base, Phase::Failed).await;
    assert_eq!(state.phase, Phase::Failed);
    assert_eq!(state.error_kind, Some(ErrorKind::JobFailure));
    assert_eq!(
        state.display_error.as_deref(),
        Some("Processing failed: image unreadable")
    );
    assert!(state.display_result.is_none());
}

#[tokio::test]
async fn test_invalid_url_is_rejected_without_creating_a_job() {
    let store = Arc::new(MemoryJobStore::new());
    let base = spawn_server(store.clone()).await;
    let client = reqwest::Client::new();

    let response = submit(&client, &base, "https://example.com/cat.jpg").await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("Failed to parse error");
    assert_eq!(body["error"], INVALID_URL_MESSAGE);

    assert_eq!(store.insert_count().await, 0);
    assert_eq!(status(&client, &base).await.phase, Phase::Idle);
}

#[tokio::test]
async fn test_resubmission_ignores_the_superseded_job() {
    let store = Arc::new(MemoryJobStore::new());
    let base = spawn_server(store.clone()).await;
    let client = reqwest::Client::new();

    let first: Submitted = submit(&client, &base, IMAGE_URL)
        .await
        .json()
        .await
        .expect("Failed to parse submission");
    let second: Submitted = submit(&client, &base, "https://media.licdn.com/dms/image/other.jpg")
        .await
        .json()
        .await
        .expect("Failed to parse submission");
    assert_ne!(first.job.id, second.job.id);

    // Only the newest job keeps a live channel.
    assert_eq!(store.subscribed_jobs().await, vec![second.job.id.clone()]);

    patch_job(
        &client,
        &base,
        &first.job.id.to_string(),
        json!({ "status": "succeeded", "result": "stale" }),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = status(&client, &base).await;
    assert_eq!(state.phase, Phase::Waiting);
    assert_eq!(state.current_job_id, Some(second.job.id));
    assert!(state.display_result.is_none());
}

#[tokio::test]
async fn test_reset_returns_to_idle_and_releases_channel() {
    let store = Arc::new(MemoryJobStore::new());
    let base = spawn_server(store.clone()).await;
    let client = reqwest::Client::new();

    let response = submit(&client, &base, IMAGE_URL).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(store.active_subscriptions().await, 1);

    let state: UiState = client
        .post(format!("{base}/api/reset"))
        .send()
        .await
        .expect("Reset request failed")
        .json()
        .await
        .expect("Failed to parse state");

    assert_eq!(state.phase, Phase::Idle);
    assert!(state.current_job_id.is_none());
    assert_eq!(store.active_subscriptions().await, 0);
}

// ============================================================================
// Image Proxy
// ============================================================================

#[tokio::test]
async fn test_proxy_rejects_disallowed_domain() {
    let base = spawn_server(Arc::new(MemoryJobStore::new())).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!(
            "{base}/proxy?url=https%3A%2F%2Fexample.com%2Fcat.jpg"
        ))
        .send()
        .await
        .expect("Proxy request failed");

    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let body: Value = response.json().await.expect("Failed to parse error");
    assert_eq!(body["error"], "Proxying from this domain is not allowed.");
}

#[tokio::test]
async fn test_proxy_requires_url_parameter() {
    let base = spawn_server(Arc::new(MemoryJobStore::new())).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/proxy"))
        .send()
        .await
        .expect("Proxy request failed");

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("Failed to parse error");
    assert_eq!(body["error"], "Missing or invalid URL parameter");
}
