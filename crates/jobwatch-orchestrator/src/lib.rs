//! Jobwatch Orchestrator
//!
//! Submits URL jobs to a backend store, listens on the job's live change feed,
//! and projects the outcome into a single rendered state, served over HTTP and
//! WebSocket.

pub mod api;
pub mod config;
pub mod error;
pub mod job;
pub mod memory_store;
pub mod orchestrator;
pub mod result_state;
pub mod store;
pub mod submitter;
pub mod subscription;
pub mod validation;
pub mod websocket;

pub use api::{create_router, ApiError, AppState, ErrorResponse, SubmitRequest};
pub use config::{Config, ProxyConfig};
pub use error::{JobwatchError, Result};
pub use job::{ChangeEvent, Job, JobId, JobStatus, JobUpdate, TerminalOutcome, UNKNOWN_FAILURE};
pub use memory_store::MemoryJobStore;
pub use orchestrator::{Orchestrator, OrchestratorHandle, Submitted};
pub use result_state::{preview_url, ErrorKind, Phase, ResultStateMachine, UiState, PROXY_ROUTE};
pub use store::{
    feed_channel, FeedEvent, FeedHandle, FeedMessage, FeedReceiver, FeedSink, JobRecords,
    JobStoreClient, StoreError,
};
pub use submitter::{TaskSubmitter, NO_JOB_DETAILS_MESSAGE};
pub use subscription::{
    EventDisposition, Notification, SubscriptionManager, SubscriptionState,
    CONNECTION_ERROR_MESSAGE,
};
pub use validation::{
    validate_url, AllowList, UrlRejection, DEFAULT_ALLOWED_DOMAIN, EMPTY_URL_MESSAGE,
    INVALID_URL_MESSAGE,
};
pub use websocket::{EventBroadcaster, StateEvent};
