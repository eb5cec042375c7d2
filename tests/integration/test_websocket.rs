//! Integration tests for the `/ws` live state feed.
//!
//! These tests validate connection handling, the initial snapshot and the
//! events broadcast while a submitted job is processed.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use jobwatch_orchestrator::{
    create_router, AppState, Config, ErrorKind, JobStatus, JobUpdate, MemoryJobStore,
    Phase, StateEvent,
};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

const IMAGE_URL: &str = "https://media.licdn.com/dms/image/profile.jpg";

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Spawns the test server and returns the WebSocket URL.
async fn spawn_test_server(state: AppState) -> (String, tokio::task::JoinHandle<()>) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");
    let ws_url = format!("ws://{addr}/ws");

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (ws_url, handle)
}

/// Connects a WebSocket client to the given URL.
async fn connect_client(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next text message from the WebSocket and parses it as a `StateEvent`.
/// Automatically handles ping frames by responding with pong.
async fn receive_event(client: &mut WsClient) -> StateEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

/// Collects events until a `state_changed` reaches `phase`.
async fn receive_until_phase(client: &mut WsClient, phase: Phase) -> Vec<StateEvent> {
    let mut events = Vec::new();
    loop {
        let event = receive_event(client).await;
        let done = matches!(&event, StateEvent::StateChanged(p) if p.state.phase == phase);
        events.push(event);
        if done {
            return events;
        }
    }
}

fn new_state() -> (AppState, Arc<MemoryJobStore>) {
    let store = Arc::new(MemoryJobStore::new());
    (AppState::new(Config::default(), store.clone()), store)
}

// ============================================================================
// Connection Tests
// ============================================================================

/// Tests that a WebSocket client receives the idle snapshot on connection.
#[tokio::test]
async fn test_client_receives_connected_event_on_connect() {
    let (state, _store) = new_state();
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client = connect_client(&ws_url).await;
    let event = receive_event(&mut client).await;

    assert!(
        matches!(event, StateEvent::Connected(_)),
        "Expected Connected event, got: {event:?}"
    );

    if let StateEvent::Connected(payload) = event {
        assert_eq!(payload.state.phase, Phase::Idle);
        assert!(payload.state.current_job_id.is_none());
    }
}

/// Tests that a client connecting mid-attempt sees the waiting state.
#[tokio::test]
async fn test_connected_event_contains_current_state() {
    let (state, _store) = new_state();
    let orchestrator = state.orchestrator.clone();
    let (ws_url, _handle) = spawn_test_server(state).await;

    let submitted = orchestrator
        .submit(IMAGE_URL)
        .await
        .expect("Submission failed");

    let mut client = connect_client(&ws_url).await;
    let event = receive_event(&mut client).await;

    assert!(matches!(event, StateEvent::Connected(_)));
    if let StateEvent::Connected(payload) = event {
        assert_eq!(payload.state.phase, Phase::Waiting);
        assert_eq!(payload.state.current_job_id, Some(submitted.job.id));
        assert_eq!(payload.state.display_url.as_deref(), Some(IMAGE_URL));
    }
}

/// Tests that multiple clients can connect concurrently.
#[tokio::test]
async fn test_multiple_clients_can_connect() {
    let (state, _store) = new_state();
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client1 = connect_client(&ws_url).await;
    let mut client2 = connect_client(&ws_url).await;
    let mut client3 = connect_client(&ws_url).await;

    let event1 = receive_event(&mut client1).await;
    let event2 = receive_event(&mut client2).await;
    let event3 = receive_event(&mut client3).await;

    assert!(matches!(event1, StateEvent::Connected(_)));
    assert!(matches!(event2, StateEvent::Connected(_)));
    assert!(matches!(event3, StateEvent::Connected(_)));
}

// ============================================================================
// Job Lifecycle Tests
// ============================================================================

/// Tests the event sequence of a submission that succeeds.
#[tokio::test]
async fn test_submission_events_through_success() {
    let (state, store) = new_state();
    let orchestrator = state.orchestrator.clone();
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;

    let submitted = orchestrator
        .submit(IMAGE_URL)
        .await
        .expect("Submission failed");
    let job_id = submitted.job.id.clone();

    let events = receive_until_phase(&mut client, Phase::Waiting).await;
    let phases: Vec<Phase> = events
        .iter()
        .filter_map(|e| match e {
            StateEvent::StateChanged(p) => Some(p.state.phase),
            _ => None,
        })
        .collect();
    assert_eq!(phases, vec![Phase::Submitting, Phase::Waiting]);

    store
        .update(&job_id, &JobUpdate::status(JobStatus::Processing))
        .await
        .expect("Update failed");
    let progress = receive_event(&mut client).await;
    assert!(
        matches!(progress, StateEvent::JobProgress(_)),
        "Expected JobProgress event, got: {progress:?}"
    );
    if let StateEvent::JobProgress(payload) = progress {
        assert_eq!(payload.job_id, job_id);
        assert_eq!(payload.status, JobStatus::Processing);
    }

    store
        .update(&job_id, &JobUpdate::succeeded("Senior Rust Engineer"))
        .await
        .expect("Update failed");
    let events = receive_until_phase(&mut client, Phase::Succeeded).await;
    let last = events.last().cloned();
    assert!(matches!(last, Some(StateEvent::StateChanged(_))));
    if let Some(StateEvent::StateChanged(payload)) = last {
        assert_eq!(
            payload.state.display_result.as_deref(),
            Some("Senior Rust Engineer")
        );
    }
}

/// Tests that a dropped live channel surfaces as an error event.
#[tokio::test]
async fn test_connection_loss_emits_error_event() {
    let (state, store) = new_state();
    let orchestrator = state.orchestrator.clone();
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;

    let submitted = orchestrator
        .submit(IMAGE_URL)
        .await
        .expect("Submission failed");
    receive_until_phase(&mut client, Phase::Waiting).await;

    store.disconnect(&submitted.job.id, "socket reset").await;

    let events = receive_until_phase(&mut client, Phase::Failed).await;
    let error = events.iter().find_map(|e| match e {
        StateEvent::Error(p) => Some(p.clone()),
        _ => None,
    });
    assert!(error.is_some(), "Expected an Error event in {events:?}");
    if let Some(payload) = error {
        assert_eq!(payload.kind, Some(ErrorKind::Connection));
    }
}

/// Tests that updates to a job nobody watches produce no events.
#[tokio::test]
async fn test_updates_for_unwatched_job_are_silent() {
    let (state, store) = new_state();
    let orchestrator = state.orchestrator.clone();
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client = connect_client(&ws_url).await;
    receive_event(&mut client).await;

    let first = orchestrator
        .submit(IMAGE_URL)
        .await
        .expect("Submission failed");
    orchestrator.reset().await.expect("Reset failed");
    receive_until_phase(&mut client, Phase::Idle).await;

    store
        .update(&first.job.id, &JobUpdate::succeeded("late"))
        .await
        .expect("Update failed");

    let next = timeout(Duration::from_millis(200), receive_event(&mut client)).await;
    assert!(next.is_err(), "Unexpected event: {next:?}");
}
