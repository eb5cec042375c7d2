//! WebSocket event types and broadcasting for live state observation.
//!
//! Every transition of the orchestrator is broadcast to connected clients, so a
//! browser can render the attempt without polling `/api/status`.
//!
//! # Event Types
//!
//! - `connected` - Sent when a client connects, includes current state
//! - `state_changed` - The rendered state changed
//! - `job_progress` - The watched job reported a non-terminal status
//! - `error` - The current attempt failed
//!
//! # Example
//!
//! ```no_run
//! use jobwatch_orchestrator::websocket::{EventBroadcaster, StateEvent};
//! use jobwatch_orchestrator::UiState;
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(StateEvent::state_changed(UiState::default()));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::job::{JobId, JobStatus};
use crate::result_state::{ErrorKind, UiState};

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` and `state_changed` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    /// The rendered state.
    pub state: UiState,
}

/// Payload for the `job_progress` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressPayload {
    /// The watched job.
    pub job_id: JobId,
    /// Its latest status.
    pub status: JobStatus,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable error message.
    pub message: String,
    /// Failure category, if the error ended an attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

// ============================================================================
// Event Enum
// ============================================================================

/// WebSocket events, serialized as `{"event": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum StateEvent {
    /// Sent when a client connects.
    Connected(StatePayload),
    /// Sent after every state transition.
    StateChanged(StatePayload),
    /// Sent for non-terminal status updates of the watched job.
    JobProgress(JobProgressPayload),
    /// Sent when an attempt fails.
    Error(ErrorPayload),
}

impl StateEvent {
    /// Creates a `Connected` event with the current state.
    #[must_use]
    pub const fn connected(state: UiState) -> Self {
        Self::Connected(StatePayload { state })
    }

    /// Creates a `StateChanged` event.
    #[must_use]
    pub const fn state_changed(state: UiState) -> Self {
        Self::StateChanged(StatePayload { state })
    }

    /// Creates a `JobProgress` event.
    #[must_use]
    pub const fn job_progress(job_id: JobId, status: JobStatus) -> Self {
        Self::JobProgress(JobProgressPayload { job_id, status })
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(message: impl Into<String>, kind: Option<ErrorKind>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
            kind,
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::StateChanged(_) => "state_changed",
            Self::JobProgress(_) => "job_progress",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts state events to all connected WebSocket clients.
///
/// Events are not kept for clients that connect later; they get a `connected`
/// snapshot instead.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<StateEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber. A subscriber that falls behind gets `Lagged`.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event and returns how many subscribers will receive it.
    pub fn send(&self, event: StateEvent) -> usize {
        // Err only means nobody is listening.
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Time between pings sent to each client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive unanswered pings after which a client is dropped.
const MAX_MISSED_PONGS: u8 = 3;

/// Tracks unanswered pings for one client.
#[derive(Debug, Default)]
struct Heartbeat {
    outstanding: u8,
}

impl Heartbeat {
    /// Called on each tick before pinging. Returns `false` once
    /// `MAX_MISSED_PONGS` pings have gone unanswered.
    fn ping_due(&mut self) -> bool {
        if self.outstanding >= MAX_MISSED_PONGS {
            return false;
        }
        self.outstanding += 1;
        true
    }

    fn pong_received(&mut self) {
        self.outstanding = 0;
    }
}

type WsSender = futures::stream::SplitSink<WebSocket, Message>;

/// Upgrades `/ws` requests and streams state events to the client.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    debug!("WebSocket upgrade requested");
    ws.on_upgrade(move |socket| serve_client(socket, state))
}

/// Serializes and sends one event. Returns `false` if the client is gone.
async fn send_event(sender: &mut WsSender, event: &StateEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!(event = event.event_name(), error = %e, "Failed to serialize event");
            true
        }
    }
}

/// Reacts to one frame from the client. Returns `false` to end the session.
async fn on_client_frame(
    frame: Option<Result<Message, axum::Error>>,
    sender: &mut WsSender,
    heartbeat: &mut Heartbeat,
) -> bool {
    match frame {
        Some(Ok(Message::Pong(_))) => {
            heartbeat.pong_received();
            true
        }
        Some(Ok(Message::Ping(data))) => sender.send(Message::Pong(data)).await.is_ok(),
        Some(Ok(Message::Text(_) | Message::Binary(_))) => {
            debug!("Ignoring inbound client frame");
            true
        }
        Some(Ok(Message::Close(_))) | None => false,
        Some(Err(e)) => {
            debug!(error = %e, "WebSocket receive failed");
            false
        }
    }
}

/// Runs one client session.
///
/// Subscribes before taking the snapshot, so no transition between the two is
/// lost.
async fn serve_client(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut inbound) = socket.split();
    let mut events = state.broadcaster.subscribe();

    let snapshot = match state.orchestrator.status().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "Cannot snapshot state for new client");
            let _ = send_event(&mut sender, &StateEvent::error(e.to_string(), None)).await;
            return;
        }
    };
    if !send_event(&mut sender, &StateEvent::connected(snapshot)).await {
        return;
    }
    info!(clients = state.broadcaster.receiver_count(), "State feed client connected");

    let mut ticker = interval(HEARTBEAT_INTERVAL);
    // The first tick completes immediately.
    ticker.tick().await;
    let mut heartbeat = Heartbeat::default();

    loop {
        let keep_going = tokio::select! {
            frame = inbound.next() => on_client_frame(frame, &mut sender, &mut heartbeat).await,
            event = events.recv() => match event {
                Ok(event) => send_event(&mut sender, &event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "State feed client fell behind");
                    true
                }
                Err(broadcast::error::RecvError::Closed) => false,
            },
            _ = ticker.tick() => {
                heartbeat.ping_due() && sender.send(Message::Ping(Vec::new())).await.is_ok()
            }
        };
        if !keep_going {
            break;
        }
    }

    info!("State feed client disconnected");
}

// ============================================================================
// Tests
// ============================================================================
