//! The orchestrator actor.
//!
//! [`Orchestrator`] owns the subscription slot and the rendered state and is
//! driven by one task. Callers reach it through an [`OrchestratorHandle`];
//! commands and live feed messages are processed one at a time, so nothing
//! outside the state machine ever mutates [`UiState`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{JobwatchError, Result};
use crate::job::Job;
use crate::result_state::{ErrorKind, Phase, ResultStateMachine, UiState};
use crate::store::{feed_channel, FeedMessage, FeedReceiver, JobStoreClient};
use crate::submitter::TaskSubmitter;
use crate::subscription::{EventDisposition, Notification, SubscriptionManager, SubscriptionState};
use crate::validation::AllowList;
use crate::websocket::{EventBroadcaster, StateEvent};

/// Commands queued for the actor before callers see back-pressure.
const COMMAND_BUFFER: usize = 32;

/// A created job together with the state right after it was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitted {
    /// The created job.
    pub job: Job,
    /// The rendered state after the submission.
    pub state: UiState,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Owner of one submit-and-listen lifecycle.
#[derive(Debug)]
pub struct Orchestrator {
    submitter: TaskSubmitter,
    subscriptions: SubscriptionManager,
    machine: ResultStateMachine,
    feed: FeedReceiver,
    broadcaster: EventBroadcaster,
}

impl Orchestrator {
    /// Creates an idle orchestrator backed by `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStoreClient>,
        allow_list: AllowList,
        broadcaster: EventBroadcaster,
    ) -> Self {
        let (sink, feed) = feed_channel();
        Self {
            submitter: TaskSubmitter::new(Arc::clone(&store), allow_list),
            subscriptions: SubscriptionManager::new(store, sink),
            machine: ResultStateMachine::new(),
            feed,
            broadcaster,
        }
    }

    /// Current rendered state.
    #[must_use]
    pub const fn state(&self) -> &UiState {
        self.machine.state()
    }

    /// Lifecycle state of the subscription slot.
    #[must_use]
    pub const fn subscription_state(&self) -> SubscriptionState {
        self.subscriptions.state()
    }

    fn publish(&self) {
        self.broadcaster
            .send(StateEvent::state_changed(self.machine.state().clone()));
    }

    fn publish_failure(&self, kind: ErrorKind) {
        if let Some(message) = &self.machine.state().display_error {
            self.broadcaster
                .send(StateEvent::error(message.clone(), Some(kind)));
        }
        self.publish();
    }

    /// Submits `url` and starts listening for its outcome.
    ///
    /// A submission while waiting on another job releases that job's live
    /// channel before the new job is created.
    ///
    /// # Errors
    ///
    /// - [`JobwatchError::Validation`]: nothing changed.
    /// - [`JobwatchError::Submission`]: the state shows the failure.
    /// - [`JobwatchError::InvalidStateTransition`]: a submission is in progress.
    ///
    /// A failure to attach the live channel is not an error here: the job
    /// exists, and the state records the connection failure.
    pub async fn submit(&mut self, url: &str) -> Result<Submitted> {
        self.submitter.validate(url)?;
        if !self.machine.phase().accepts_submission() {
            return Err(JobwatchError::invalid_transition(
                self.machine.phase(),
                Phase::Submitting,
            ));
        }

        if let Some(previous) = self.subscriptions.target() {
            info!(job_id = %previous, "Superseding in-flight job");
        }
        self.subscriptions.teardown().await;

        self.machine.begin_submission(url)?;
        self.publish();

        let job = match self.submitter.submit(url).await {
            Ok(job) => job,
            Err(e) => {
                self.machine.submission_failed(&e)?;
                self.publish_failure(ErrorKind::Submission);
                return Err(e);
            }
        };

        self.machine.submission_succeeded(&job)?;
        self.publish();

        if let Err(e) = self.subscriptions.subscribe(&job.id).await {
            if self.machine.connection_failed(&job.id, &e) {
                self.publish_failure(ErrorKind::Connection);
            }
        }

        Ok(Submitted {
            job,
            state: self.machine.state().clone(),
        })
    }

    /// Releases the live channel and returns to `Idle`.
    pub async fn reset(&mut self) -> UiState {
        self.subscriptions.teardown().await;
        self.machine.reset();
        self.publish();
        info!("Orchestrator reset");
        self.machine.state().clone()
    }

    /// Routes one live feed message through the slot and the state machine.
    pub async fn on_feed_message(&mut self, message: FeedMessage) -> EventDisposition {
        let machine = &mut self.machine;
        let broadcaster = &self.broadcaster;
        self.subscriptions
            .on_event(message, |notification| {
                apply_notification(machine, broadcaster, &notification);
            })
            .await
    }

    /// Handles every feed message already queued. Returns how many were handled.
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.feed.try_recv() {
            self.on_feed_message(message).await;
            handled += 1;
        }
        handled
    }

    /// Releases the live channel before the process exits.
    pub async fn shutdown(&mut self) {
        self.subscriptions.teardown().await;
        info!("Orchestrator shut down");
    }

    /// Moves the orchestrator onto its own task.
    #[must_use]
    pub fn spawn(self) -> OrchestratorHandle {
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(self.run(receiver));
        OrchestratorHandle { commands }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!("Orchestrator task started");
        loop {
            // Unbiased: a busy command queue must not starve the feed.
            let next = tokio::select! {
                command = commands.recv() => Next::Command(command),
                Some(message) = self.feed.recv() => Next::Feed(message),
            };

            match next {
                Next::Feed(message) => {
                    self.on_feed_message(message).await;
                }
                Next::Command(Some(Command::Submit { url, reply })) => {
                    let _ = reply.send(self.submit(&url).await);
                }
                Next::Command(Some(Command::Reset { reply })) => {
                    let _ = reply.send(self.reset().await);
                }
                Next::Command(Some(Command::Status { reply })) => {
                    let _ = reply.send(self.machine.state().clone());
                }
                Next::Command(Some(Command::Subscription { reply })) => {
                    let _ = reply.send(self.subscriptions.state());
                }
                Next::Command(Some(Command::Shutdown { reply })) => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
                Next::Command(None) => {
                    self.shutdown().await;
                    break;
                }
            }
        }
        debug!("Orchestrator task stopped");
    }
}

/// Applies a slot notification to the state machine and broadcasts the result.
fn apply_notification(
    machine: &mut ResultStateMachine,
    broadcaster: &EventBroadcaster,
    notification: &Notification,
) {
    if !machine.apply(notification) {
        return;
    }

    match notification {
        Notification::StillWaiting { job_id, status } => {
            broadcaster.send(StateEvent::job_progress(job_id.clone(), *status));
        }
        Notification::Terminal { job_id, .. } => {
            info!(job_id = %job_id, phase = %machine.phase(), "Job finished");
        }
        Notification::ConnectionLost { job_id, .. } => {
            warn!(job_id = %job_id, "Job result lost to a connection error");
        }
    }

    let state = machine.state();
    if let (Some(message), Some(kind)) = (&state.display_error, state.error_kind) {
        broadcaster.send(StateEvent::error(message.clone(), Some(kind)));
    }
    broadcaster.send(StateEvent::state_changed(state.clone()));
}

// ============================================================================
// Handle
// ============================================================================

enum Next {
    Command(Option<Command>),
    Feed(FeedMessage),
}

enum Command {
    Submit {
        url: String,
        reply: oneshot::Sender<Result<Submitted>>,
    },
    Reset {
        reply: oneshot::Sender<UiState>,
    },
    Status {
        reply: oneshot::Sender<UiState>,
    },
    Subscription {
        reply: oneshot::Sender<SubscriptionState>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a spawned [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
}

impl OrchestratorHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| JobwatchError::OrchestratorUnavailable)?;
        response
            .await
            .map_err(|_| JobwatchError::OrchestratorUnavailable)
    }

    /// Submits `url`. See [`Orchestrator::submit`].
    pub async fn submit(&self, url: impl Into<String>) -> Result<Submitted> {
        let url = url.into();
        self.request(|reply| Command::Submit { url, reply }).await?
    }

    /// Returns to `Idle`, releasing the live channel.
    pub async fn reset(&self) -> Result<UiState> {
        self.request(|reply| Command::Reset { reply }).await
    }

    /// Current rendered state.
    pub async fn status(&self) -> Result<UiState> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Lifecycle state of the subscription slot.
    pub async fn subscription_state(&self) -> Result<SubscriptionState> {
        self.request(|reply| Command::Subscription { reply }).await
    }

    /// Releases the live channel and stops the actor.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Returns `true` once the actor has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

// ============================================================================
// Tests
// ============================================================================
