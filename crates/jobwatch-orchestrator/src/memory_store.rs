//! In-process job store used by the server binary and the test suites.
//!
//! Besides the [`JobStoreClient`] contract it exposes the backend side of the
//! store: workers call [`MemoryJobStore::update`] to move a job forward, and
//! every open subscription on that id receives the resulting [`ChangeEvent`].
//! Fault injection hooks let tests exercise each failure path of the contract.
//!
//! [`ChangeEvent`]: crate::ChangeEvent

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::job::{Job, JobId, JobUpdate};
use crate::store::{FeedHandle, FeedMessage, FeedSink, JobRecords, JobStoreClient, StoreError};

#[derive(Debug)]
struct Subscriber {
    job_id: JobId,
    sink: FeedSink,
}

#[derive(Debug, Default)]
struct Faults {
    insert: Option<String>,
    insert_without_row: bool,
    subscribe: Option<String>,
    unsubscribe: Option<String>,
    unsubscribe_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    subscribers: BTreeMap<FeedHandle, Subscriber>,
    next_handle: u64,
    inserts: usize,
    faults: Faults,
}

impl Inner {
    /// Sends `message` to every subscriber of `job_id`, pruning dead sinks.
    fn fan_out(&mut self, job_id: &JobId, message: impl Fn(FeedHandle) -> FeedMessage) -> usize {
        let mut delivered = 0;
        self.subscribers.retain(|handle, subscriber| {
            if subscriber.job_id != *job_id {
                return true;
            }
            if subscriber.sink.deliver(message(*handle)) {
                delivered += 1;
                true
            } else {
                debug!(handle = %handle, "Pruning subscriber with closed sink");
                false
            }
        });
        delivered
    }
}

/// A [`JobStoreClient`] backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of a job.
    pub async fn get(&self, job_id: &JobId) -> Option<Job> {
        self.inner.lock().await.jobs.get(job_id).cloned()
    }

    /// Applies a backend-side update and notifies subscribers of that job.
    pub async fn update(&self, job_id: &JobId, update: &JobUpdate) -> Result<Job, StoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
        job.apply(update);
        let job = job.clone();

        let change = job.change_event();
        let delivered = inner.fan_out(job_id, |handle| FeedMessage::change(handle, change.clone()));
        info!(job_id = %job_id, status = %job.status, delivered, "Job updated");
        Ok(job)
    }

    /// Delivers the current state of a job again, as an at-least-once backend may.
    pub async fn redeliver(&self, job_id: &JobId) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().await;
        let change = inner
            .jobs
            .get(job_id)
            .map(Job::change_event)
            .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
        Ok(inner.fan_out(job_id, |handle| FeedMessage::change(handle, change.clone())))
    }

    /// Breaks every live channel filtered to `job_id`.
    ///
    /// Subscribers receive a connection-lost message and their handles are closed.
    pub async fn disconnect(&self, job_id: &JobId, reason: &str) -> usize {
        let mut inner = self.inner.lock().await;
        let delivered = inner.fan_out(job_id, |handle| {
            FeedMessage::connection_lost(handle, job_id.clone(), reason)
        });
        inner.subscribers.retain(|_, s| s.job_id != *job_id);
        warn!(job_id = %job_id, reason, delivered, "Live channels disconnected");
        delivered
    }

    /// Number of open live channels.
    pub async fn active_subscriptions(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    /// Job ids that currently have an open live channel, one entry per channel.
    pub async fn subscribed_jobs(&self) -> Vec<JobId> {
        self.inner
            .lock()
            .await
            .subscribers
            .values()
            .map(|s| s.job_id.clone())
            .collect()
    }

    /// Number of successful inserts so far.
    pub async fn insert_count(&self) -> usize {
        self.inner.lock().await.inserts
    }

    /// Makes the next insert fail with `message`.
    pub async fn fail_next_insert(&self, message: impl Into<String>) {
        self.inner.lock().await.faults.insert = Some(message.into());
    }

    /// Makes the next insert succeed without returning a row.
    pub async fn return_no_row_next_insert(&self) {
        self.inner.lock().await.faults.insert_without_row = true;
    }

    /// Makes the next subscribe fail with `message`.
    pub async fn fail_next_subscribe(&self, message: impl Into<String>) {
        self.inner.lock().await.faults.subscribe = Some(message.into());
    }

    /// Makes the next unsubscribe fail with `message`. The channel is still closed.
    pub async fn fail_next_unsubscribe(&self, message: impl Into<String>) {
        self.inner.lock().await.faults.unsubscribe = Some(message.into());
    }

    /// Delays every unsubscribe, keeping the channel open meanwhile.
    pub async fn set_unsubscribe_delay(&self, delay: Option<Duration>) {
        self.inner.lock().await.faults.unsubscribe_delay = delay;
    }
}

#[async_trait]
impl JobRecords for MemoryJobStore {
    async fn get(&self, job_id: &JobId) -> Option<Job> {
        Self::get(self, job_id).await
    }

    async fn update(&self, job_id: &JobId, update: &JobUpdate) -> Result<Job, StoreError> {
        Self::update(self, job_id, update).await
    }
}

#[async_trait]
impl JobStoreClient for MemoryJobStore {
    async fn insert(&self, url: &str) -> Result<Option<Job>, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(message) = inner.faults.insert.take() {
            return Err(StoreError::InsertRejected(message));
        }

        let job = Job::pending(JobId::new(Uuid::new_v4().to_string()), url);
        inner.jobs.insert(job.id.clone(), job.clone());
        inner.inserts += 1;
        debug!(job_id = %job.id, url, "Job inserted");

        if std::mem::take(&mut inner.faults.insert_without_row) {
            return Ok(None);
        }
        Ok(Some(job))
    }

    async fn subscribe(&self, job_id: &JobId, sink: FeedSink) -> Result<FeedHandle, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(message) = inner.faults.subscribe.take() {
            return Err(StoreError::SubscribeFailed(message));
        }

        inner.next_handle += 1;
        let handle = FeedHandle::new(inner.next_handle);
        inner.subscribers.insert(
            handle,
            Subscriber {
                job_id: job_id.clone(),
                sink,
            },
        );
        debug!(job_id = %job_id, handle = %handle, "Live channel opened");
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: FeedHandle) -> Result<(), StoreError> {
        let delay = self.inner.lock().await.faults.unsubscribe_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().await;
        let removed = inner.subscribers.remove(&handle);
        if let Some(message) = inner.faults.unsubscribe.take() {
            return Err(StoreError::UnsubscribeFailed(message));
        }
        match removed {
            Some(subscriber) => {
                debug!(job_id = %subscriber.job_id, handle = %handle, "Live channel closed");
                Ok(())
            }
            None => Err(StoreError::UnknownHandle(handle)),
        }
    }
}
