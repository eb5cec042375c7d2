//! User-facing state machine and its rendered projection.
//!
//! ```text
//!             submit            insert ok              terminal ok
//!   Idle ────────────▶ Submitting ─────────▶ Waiting ──────────────▶ Succeeded
//!    ▲                     │                  │  │
//!    │ reset (from any)    │ insert failed    │  │ terminal failed /
//!    │                     ▼                  │  │ connection error
//!    └─────────────────  Failed ◀─────────────┘  │
//!                                                 │ resubmit
//!                                   Submitting ◀──┘
//! ```
//!
//! [`UiState`] is only ever changed through the transition methods here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::form_urlencoded;

use crate::error::{JobwatchError, Result};
use crate::job::{Job, JobId, JobStatus, TerminalOutcome};
use crate::subscription::Notification;

/// Route of the image proxy used for previews.
pub const PROXY_ROUTE: &str = "/proxy";

/// Builds the preview link for a submitted URL.
#[must_use]
pub fn preview_url(url: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(url.as_bytes()).collect();
    format!("{PROXY_ROUTE}?url={encoded}")
}

// ============================================================================
// Phase
// ============================================================================

/// The phase of the current attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing submitted.
    #[default]
    Idle,
    /// The job is being created.
    Submitting,
    /// The job exists and its outcome is awaited.
    Waiting,
    /// The job produced a result.
    Succeeded,
    /// The attempt failed.
    Failed,
}

impl Phase {
    /// Returns `true` for phases that stay put until reset or resubmission.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns `true` if a new submission may start from this phase.
    #[must_use]
    pub const fn accepts_submission(self) -> bool {
        !matches!(self, Self::Submitting)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Submitting => write!(f, "submitting"),
            Self::Waiting => write!(f, "waiting"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Which kind of failure is being displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The job could not be created.
    Submission,
    /// The backend reported a processing failure.
    JobFailure,
    /// The live channel failed before an outcome arrived.
    Connection,
}

// ============================================================================
// UiState
// ============================================================================

/// The single rendered projection of the current attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    /// Current phase.
    pub phase: Phase,
    /// Job being watched, once created.
    pub current_job_id: Option<JobId>,
    /// The submitted URL.
    pub display_url: Option<String>,
    /// Proxy link for previewing the submitted URL.
    pub preview_url: Option<String>,
    /// Latest status reported for the job.
    pub job_status: Option<JobStatus>,
    /// Result text on success.
    pub display_result: Option<String>,
    /// Message shown on failure.
    pub display_error: Option<String>,
    /// Category of the displayed failure.
    pub error_kind: Option<ErrorKind>,
    /// When the state last changed.
    pub updated_at: DateTime<Utc>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            current_job_id: None,
            display_url: None,
            preview_url: None,
            job_status: None,
            display_result: None,
            display_error: None,
            error_kind: None,
            updated_at: Utc::now(),
        }
    }
}

// ============================================================================
// ResultStateMachine
// ============================================================================

/// Owner of [`UiState`]; every change goes through a transition method.
#[derive(Debug, Clone, Default)]
pub struct ResultStateMachine {
    state: UiState,
}

impl ResultStateMachine {
    /// Creates a machine in `Idle`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current projection.
    #[must_use]
    pub const fn state(&self) -> &UiState {
        &self.state
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Returns `true` if `job_id` is the job this machine is waiting on.
    #[must_use]
    pub fn is_waiting_on(&self, job_id: &JobId) -> bool {
        self.state.phase == Phase::Waiting && self.state.current_job_id.as_ref() == Some(job_id)
    }

    fn touch(&mut self) {
        self.state.updated_at = Utc::now();
    }

    fn transition(&mut self, to: Phase) {
        debug!(from = %self.state.phase, to = %to, "Phase transition");
        self.state.phase = to;
        self.touch();
    }

    /// `Idle | Waiting | Succeeded | Failed → Submitting`.
    ///
    /// Clears the previous attempt and shows `url` with its preview link.
    ///
    /// # Errors
    ///
    /// Returns [`JobwatchError::InvalidStateTransition`] while already submitting.
    pub fn begin_submission(&mut self, url: &str) -> Result<()> {
        if !self.state.phase.accepts_submission() {
            return Err(JobwatchError::invalid_transition(
                self.state.phase,
                Phase::Submitting,
            ));
        }
        let url = url.trim();
        self.state = UiState {
            display_url: Some(url.to_string()),
            preview_url: Some(preview_url(url)),
            ..UiState::default()
        };
        self.transition(Phase::Submitting);
        Ok(())
    }

    /// `Submitting → Waiting` for the created job.
    ///
    /// # Errors
    ///
    /// Returns [`JobwatchError::InvalidStateTransition`] outside `Submitting`.
    pub fn submission_succeeded(&mut self, job: &Job) -> Result<()> {
        self.expect_phase(Phase::Submitting, Phase::Waiting)?;
        self.state.current_job_id = Some(job.id.clone());
        self.state.job_status = Some(job.status);
        self.transition(Phase::Waiting);
        Ok(())
    }

    /// `Submitting → Failed` with the submission error. The submitted URL is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`JobwatchError::InvalidStateTransition`] outside `Submitting`.
    pub fn submission_failed(&mut self, error: &JobwatchError) -> Result<()> {
        self.expect_phase(Phase::Submitting, Phase::Failed)?;
        self.state.display_url = None;
        self.state.preview_url = None;
        self.fail(ErrorKind::Submission, error.to_string());
        Ok(())
    }

    /// Applies a notification from the subscription slot.
    ///
    /// Returns `false` and changes nothing unless the machine is `Waiting` on
    /// the notification's job.
    pub fn apply(&mut self, notification: &Notification) -> bool {
        if !self.is_waiting_on(notification.job_id()) {
            debug!(
                job_id = %notification.job_id(),
                phase = %self.state.phase,
                "Ignoring notification for inactive job"
            );
            return false;
        }

        match notification {
            Notification::StillWaiting { status, .. } => {
                self.state.job_status = Some(*status);
                self.touch();
            }
            Notification::Terminal {
                outcome: TerminalOutcome::Succeeded(result),
                ..
            } => {
                self.state.job_status = Some(JobStatus::Succeeded);
                self.state.display_result = Some(result.clone());
                self.transition(Phase::Succeeded);
            }
            Notification::Terminal {
                outcome: TerminalOutcome::Failed(message),
                ..
            } => {
                self.state.job_status = Some(JobStatus::Failed);
                self.fail(
                    ErrorKind::JobFailure,
                    JobwatchError::job_failure(message.as_str()).to_string(),
                );
            }
            Notification::ConnectionLost { message, .. } => {
                self.fail(ErrorKind::Connection, message.clone());
            }
        }
        true
    }

    /// `Waiting → Failed` when the live channel for `job_id` could not be opened.
    ///
    /// Returns `false` and changes nothing unless waiting on `job_id`.
    pub fn connection_failed(&mut self, job_id: &JobId, error: &JobwatchError) -> bool {
        if !self.is_waiting_on(job_id) {
            return false;
        }
        self.fail(ErrorKind::Connection, error.to_string());
        true
    }

    /// `any → Idle`, clearing every field.
    pub fn reset(&mut self) {
        self.state = UiState::default();
        debug!("State reset to idle");
    }

    fn fail(&mut self, kind: ErrorKind, message: String) {
        self.state.display_result = None;
        self.state.display_error = Some(message);
        self.state.error_kind = Some(kind);
        self.transition(Phase::Failed);
    }

    fn expect_phase(&self, expected: Phase, to: Phase) -> Result<()> {
        if self.state.phase == expected {
            Ok(())
        } else {
            Err(JobwatchError::invalid_transition(self.state.phase, to))
        }
    }
}
