//! The single live subscription slot.
//!
//! [`SubscriptionManager`] owns at most one live channel at a time and moves it
//! through `Detached → Attaching → Attached → Detaching → Detached`. Every feed
//! message is checked against the slot before it can produce a
//! [`Notification`]: messages for another job, for an old handle, or arriving
//! while not attached are dropped. A terminal change is emitted once and the
//! slot is released right after.
//!
//! All transitions take `&mut self`, so the owner serialises them; a detach is
//! always awaited to completion before the next attach starts.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{JobwatchError, Result};
use crate::job::{JobId, JobStatus, TerminalOutcome};
use crate::store::{FeedEvent, FeedHandle, FeedMessage, FeedSink, JobStoreClient};

/// Shown when the live channel cannot be opened or is lost before a terminal result.
pub const CONNECTION_ERROR_MESSAGE: &str =
    "Connection error listening for results. Please try again.";

// ============================================================================
// Public state
// ============================================================================

/// Lifecycle state of the subscription slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// No live channel.
    #[default]
    Detached,
    /// A live channel has been requested.
    Attaching,
    /// A live channel is open and events are accepted.
    Attached,
    /// The live channel is being released.
    Detaching,
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Detached => write!(f, "detached"),
            Self::Attaching => write!(f, "attaching"),
            Self::Attached => write!(f, "attached"),
            Self::Detaching => write!(f, "detaching"),
        }
    }
}

/// What the slot reports upward for an accepted feed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The job reached a terminal outcome. Emitted at most once per job.
    Terminal {
        /// The finished job.
        job_id: JobId,
        /// Its outcome.
        outcome: TerminalOutcome,
    },
    /// A non-terminal status update.
    StillWaiting {
        /// The job being watched.
        job_id: JobId,
        /// Its latest status.
        status: JobStatus,
    },
    /// The live channel broke before a terminal outcome.
    ConnectionLost {
        /// The job being watched.
        job_id: JobId,
        /// Message shown to the user.
        message: String,
    },
}

impl Notification {
    /// The job this notification belongs to.
    #[must_use]
    pub const fn job_id(&self) -> &JobId {
        match self {
            Self::Terminal { job_id, .. }
            | Self::StillWaiting { job_id, .. }
            | Self::ConnectionLost { job_id, .. } => job_id,
        }
    }
}

/// How a feed message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// A progress notice was emitted.
    Progress,
    /// A terminal notification was emitted and the slot released.
    Terminal,
    /// A connection-lost notification was emitted and the slot released.
    ConnectionLost,
    /// The message did not match the attached subscription and was ignored.
    Dropped,
}

// ============================================================================
// SubscriptionManager
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Detached,
    Attaching { job_id: JobId },
    Attached { job_id: JobId, handle: FeedHandle },
    Detaching { job_id: JobId },
}

/// Owner of the single live subscription.
pub struct SubscriptionManager {
    store: Arc<dyn JobStoreClient>,
    sink: FeedSink,
    slot: Slot,
    terminal_emitted: Option<JobId>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("slot", &self.slot)
            .field("terminal_emitted", &self.terminal_emitted)
            .finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    /// Creates a detached manager. Live channels deliver into `sink`.
    #[must_use]
    pub fn new(store: Arc<dyn JobStoreClient>, sink: FeedSink) -> Self {
        Self {
            store,
            sink,
            slot: Slot::Detached,
            terminal_emitted: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SubscriptionState {
        match self.slot {
            Slot::Detached => SubscriptionState::Detached,
            Slot::Attaching { .. } => SubscriptionState::Attaching,
            Slot::Attached { .. } => SubscriptionState::Attached,
            Slot::Detaching { .. } => SubscriptionState::Detaching,
        }
    }

    /// The job the slot is bound to, if any.
    #[must_use]
    pub const fn target(&self) -> Option<&JobId> {
        match &self.slot {
            Slot::Detached => None,
            Slot::Attaching { job_id }
            | Slot::Attached { job_id, .. }
            | Slot::Detaching { job_id } => Some(job_id),
        }
    }

    /// The open live handle, if attached.
    #[must_use]
    pub const fn handle(&self) -> Option<FeedHandle> {
        match self.slot {
            Slot::Attached { handle, .. } => Some(handle),
            _ => None,
        }
    }

    /// Attaches the slot to `job_id`.
    ///
    /// Already attached (or attaching) to the same job is a no-op. Attached to
    /// another job tears that subscription down first and waits for it.
    ///
    /// # Errors
    ///
    /// Returns [`JobwatchError::Connection`] if the store cannot open the
    /// channel; the slot is left `Detached`.
    pub async fn subscribe(&mut self, job_id: &JobId) -> Result<()> {
        let already_bound = matches!(
            &self.slot,
            Slot::Attaching { job_id: current } | Slot::Attached { job_id: current, .. }
                if current == job_id
        );
        if already_bound {
            debug!(job_id = %job_id, "Already subscribed");
            return Ok(());
        }
        self.teardown().await;

        self.slot = Slot::Attaching {
            job_id: job_id.clone(),
        };
        self.terminal_emitted = None;

        match self.store.subscribe(job_id, self.sink.clone()).await {
            Ok(handle) => {
                info!(job_id = %job_id, handle = %handle, "Subscription attached");
                self.slot = Slot::Attached {
                    job_id: job_id.clone(),
                    handle,
                };
                Ok(())
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Subscription attach failed");
                self.slot = Slot::Detached;
                Err(JobwatchError::connection(CONNECTION_ERROR_MESSAGE))
            }
        }
    }

    /// Releases the live channel, if any.
    ///
    /// Always ends `Detached`. A failed release is logged and otherwise ignored,
    /// so this can be called any number of times.
    pub async fn teardown(&mut self) {
        let slot = std::mem::replace(&mut self.slot, Slot::Detached);
        match slot {
            Slot::Detached => {}
            Slot::Attached { job_id, handle } => {
                self.slot = Slot::Detaching {
                    job_id: job_id.clone(),
                };
                match self.store.unsubscribe(handle).await {
                    Ok(()) => info!(job_id = %job_id, handle = %handle, "Subscription detached"),
                    Err(e) => warn!(
                        job_id = %job_id,
                        handle = %handle,
                        error = %e,
                        "Unsubscribe failed; slot released anyway"
                    ),
                }
                self.slot = Slot::Detached;
            }
            // Left over from an interrupted transition; there is no handle to release.
            Slot::Attaching { job_id } | Slot::Detaching { job_id } => {
                debug!(job_id = %job_id, "Clearing interrupted subscription");
            }
        }
    }

    /// Routes one feed message.
    ///
    /// `emit` is called at most once, before any teardown the message causes.
    pub async fn on_event<F>(&mut self, message: FeedMessage, emit: F) -> EventDisposition
    where
        F: FnOnce(Notification),
    {
        let accepted = matches!(
            &self.slot,
            Slot::Attached { job_id, handle }
                if *job_id == message.job_id && *handle == message.handle
        );
        if !accepted {
            debug!(
                job_id = %message.job_id,
                handle = %message.handle,
                state = %self.state(),
                "Dropping stale feed message"
            );
            return EventDisposition::Dropped;
        }

        let job_id = message.job_id;
        match message.event {
            FeedEvent::Change(change) => match change.terminal_outcome() {
                Some(outcome) => {
                    info!(job_id = %job_id, ?outcome, "Terminal change received");
                    self.terminal_emitted = Some(job_id.clone());
                    emit(Notification::Terminal { job_id, outcome });
                    self.teardown().await;
                    EventDisposition::Terminal
                }
                None => {
                    debug!(job_id = %job_id, status = %change.status, "Job still running");
                    emit(Notification::StillWaiting {
                        job_id,
                        status: change.status,
                    });
                    EventDisposition::Progress
                }
            },
            FeedEvent::ConnectionLost { reason } => {
                if self.terminal_emitted.as_ref() == Some(&job_id) {
                    debug!(job_id = %job_id, %reason, "Ignoring connection loss after terminal");
                    return EventDisposition::Dropped;
                }
                warn!(job_id = %job_id, %reason, "Live channel lost");
                emit(Notification::ConnectionLost {
                    job_id,
                    message: CONNECTION_ERROR_MESSAGE.to_string(),
                });
                self.teardown().await;
                EventDisposition::ConnectionLost
            }
        }
    }
}
