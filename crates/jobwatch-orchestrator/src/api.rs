//! HTTP API endpoints for the Jobwatch server.
//!
//! # Endpoints
//!
//! - `POST /api/submit` - Submit a URL and start listening for its outcome
//! - `GET /api/status` - Current rendered state
//! - `POST /api/reset` - Return to idle, releasing the live subscription
//! - `GET /api/jobs/:id` - Read a job record
//! - `PATCH /api/jobs/:id` - Backend worker write surface for a job record
//! - `GET /ws` - WebSocket state feed
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use jobwatch_orchestrator::{create_router, AppState, Config, MemoryJobStore};
//!
//! # async fn example() {
//! let state = AppState::new(Config::default(), Arc::new(MemoryJobStore::new()));
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::JobwatchError;
use crate::job::{Job, JobId, JobUpdate};
use crate::orchestrator::{Orchestrator, OrchestratorHandle, Submitted};
use crate::result_state::UiState;
use crate::store::{JobRecords, JobStoreClient, StoreError};
use crate::websocket::{ws_handler, EventBroadcaster};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for the submit endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    /// URL to process.
    pub url: String,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Handle to the running orchestrator.
    pub orchestrator: OrchestratorHandle,
    /// Job records behind the `/api/jobs` routes.
    pub records: Arc<dyn JobRecords>,
    /// Broadcaster feeding `/ws` clients.
    pub broadcaster: EventBroadcaster,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("orchestrator", &self.orchestrator)
            .field("broadcaster", &self.broadcaster)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Spawns an orchestrator over a store that also serves job records.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new<S>(config: Config, store: Arc<S>) -> Self
    where
        S: JobStoreClient + JobRecords + 'static,
    {
        Self::with_records(config, store.clone(), store)
    }

    /// Spawns an orchestrator over `client` and serves job records from `records`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn with_records(
        config: Config,
        client: Arc<dyn JobStoreClient>,
        records: Arc<dyn JobRecords>,
    ) -> Self {
        let broadcaster = EventBroadcaster::new(config.event_buffer_capacity);
        let orchestrator =
            Orchestrator::new(client, config.allow_list(), broadcaster.clone()).spawn();
        Self {
            config,
            orchestrator,
            records,
            broadcaster,
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Error type for API handlers.
#[derive(Debug)]
pub enum ApiError {
    /// The request was rejected before anything changed.
    BadRequest(String),
    /// The requested record does not exist.
    NotFound(String),
    /// The request conflicts with an operation in progress.
    Conflict(String),
    /// The job store failed to create the job.
    BadGateway(String),
    /// The orchestrator is not running.
    Unavailable(String),
    /// Anything else.
    Internal(String),
}

impl From<JobwatchError> for ApiError {
    fn from(error: JobwatchError) -> Self {
        let message = error.to_string();
        match error {
            JobwatchError::Validation { .. } => Self::BadRequest(message),
            JobwatchError::Submission { .. } => Self::BadGateway(message),
            JobwatchError::InvalidStateTransition { .. } => Self::Conflict(message),
            JobwatchError::OrchestratorUnavailable => Self::Unavailable(message),
            _ => Self::Internal(message),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::JobNotFound(_) => Self::NotFound(error.to_string()),
            _ => Self::Internal(error.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with the API routes and the `/ws` feed.
///
/// Carries permissive CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/submit", post(handle_submit))
        .route("/status", get(handle_status))
        .route("/reset", post(handle_reset))
        .route("/jobs/:id", get(handle_get_job).patch(handle_update_job));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `POST /api/submit`.
async fn handle_submit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<Submitted>, ApiError> {
    info!(url = %request.url, "Submit request received");
    let submitted = state.orchestrator.submit(request.url).await.map_err(|e| {
        warn!(error = %e, "Submit request failed");
        ApiError::from(e)
    })?;
    Ok(Json(submitted))
}

/// Handler for `GET /api/status`.
async fn handle_status(State(state): State<Arc<AppState>>) -> Result<Json<UiState>, ApiError> {
    Ok(Json(state.orchestrator.status().await?))
}

/// Handler for `POST /api/reset`.
async fn handle_reset(State(state): State<Arc<AppState>>) -> Result<Json<UiState>, ApiError> {
    info!("Reset request received");
    Ok(Json(state.orchestrator.reset().await?))
}

/// Handler for `GET /api/jobs/:id`.
async fn handle_get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job_id = JobId::new(id);
    state
        .records
        .get(&job_id)
        .await
        .map(Json)
        .ok_or_else(|| StoreError::JobNotFound(job_id).into())
}

/// Handler for `PATCH /api/jobs/:id`.
async fn handle_update_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<JobUpdate>,
) -> Result<Json<Job>, ApiError> {
    let job = state.records.update(&JobId::new(id), &update).await?;
    Ok(Json(job))
}

// ============================================================================
// Tests
// ============================================================================
