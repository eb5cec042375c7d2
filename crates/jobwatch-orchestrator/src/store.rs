//! Contract of the backend job store consumed by the orchestrator.
//!
//! The store creates jobs and delivers live [`ChangeEvent`]s for a single job
//! id into a [`FeedSink`]. Delivery is at-least-once and ordered per job id;
//! nothing is promised across ids.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::job::{ChangeEvent, Job, JobId, JobUpdate};

/// Errors reported by a job store backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The insert was rejected by the backend.
    #[error("insert rejected: {0}")]
    InsertRejected(String),

    /// The live channel could not be opened.
    #[error("subscription failed: {0}")]
    SubscribeFailed(String),

    /// Releasing the live channel failed.
    #[error("unsubscribe failed: {0}")]
    UnsubscribeFailed(String),

    /// The handle does not belong to any open subscription.
    #[error("unknown subscription handle: {0}")]
    UnknownHandle(FeedHandle),

    /// The job does not exist.
    #[error("job not found: {0}")]
    JobNotFound(JobId),
}

/// Identifies one open live subscription in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedHandle(u64);

impl FeedHandle {
    /// Wraps a store-assigned handle number.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw handle number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for FeedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What happened on a live channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The job record changed.
    Change(ChangeEvent),
    /// The transport failed; no further changes will arrive on this handle.
    ConnectionLost {
        /// Transport-level reason, for logs only.
        reason: String,
    },
}

/// A message delivered by the store on a live channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    /// The handle the message was delivered on.
    pub handle: FeedHandle,
    /// The job the channel is filtered to.
    pub job_id: JobId,
    /// The delivered event.
    pub event: FeedEvent,
}

impl FeedMessage {
    /// A change notification.
    #[must_use]
    pub fn change(handle: FeedHandle, event: ChangeEvent) -> Self {
        Self {
            handle,
            job_id: event.job_id.clone(),
            event: FeedEvent::Change(event),
        }
    }

    /// A transport failure for `job_id`.
    #[must_use]
    pub fn connection_lost(handle: FeedHandle, job_id: JobId, reason: impl Into<String>) -> Self {
        Self {
            handle,
            job_id,
            event: FeedEvent::ConnectionLost {
                reason: reason.into(),
            },
        }
    }
}

/// Sending half of a live channel, handed to the store on subscribe.
#[derive(Debug, Clone)]
pub struct FeedSink {
    sender: mpsc::UnboundedSender<FeedMessage>,
}

impl FeedSink {
    /// Delivers a message. Returns `false` if the receiving side is gone.
    pub fn deliver(&self, message: FeedMessage) -> bool {
        self.sender.send(message).is_ok()
    }

    /// Returns `true` if the receiving side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Receiving half of a live channel, owned by the orchestrator.
pub type FeedReceiver = mpsc::UnboundedReceiver<FeedMessage>;

/// Creates a live channel pair.
#[must_use]
pub fn feed_channel() -> (FeedSink, FeedReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (FeedSink { sender }, receiver)
}

/// Backend job store consumed by the orchestrator.
///
/// Implementations must be shareable across tasks; the orchestrator receives
/// one as an explicit dependency.
#[async_trait]
pub trait JobStoreClient: Send + Sync {
    /// Creates a job for `url` with status `Pending`.
    ///
    /// `Ok(None)` means the backend accepted the write but returned no row.
    async fn insert(&self, url: &str) -> Result<Option<Job>, StoreError>;

    /// Opens a live channel filtered to `job_id`, delivering into `sink`.
    async fn subscribe(&self, job_id: &JobId, sink: FeedSink) -> Result<FeedHandle, StoreError>;

    /// Releases a live channel. Failures are non-fatal to the caller.
    async fn unsubscribe(&self, handle: FeedHandle) -> Result<(), StoreError>;
}

/// Record access for the backend worker side of a job store.
///
/// The HTTP job routes use this; the orchestrator never does.
#[async_trait]
pub trait JobRecords: Send + Sync {
    /// Returns a snapshot of a job, or `None` if it does not exist.
    async fn get(&self, job_id: &JobId) -> Option<Job>;

    /// Applies an update and notifies live subscribers of that job.
    async fn update(&self, job_id: &JobId, update: &JobUpdate) -> Result<Job, StoreError>;
}
