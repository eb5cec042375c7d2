//! Job records and change events observed from the backend job store.
//!
//! The orchestrator never writes job status itself; it only holds read-only
//! snapshots and reacts to [`ChangeEvent`]s delivered by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message used when the backend marks a job failed without saying why.
pub const UNKNOWN_FAILURE: &str = "Unknown error";

// ============================================================================
// JobId
// ============================================================================

/// Opaque identifier assigned to a job by the backend store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wraps a backend-assigned identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier carries no usable value.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ============================================================================
// JobStatus
// ============================================================================

/// Processing status of a job as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job was created and is queued.
    #[default]
    Pending,
    /// A worker picked the job up.
    Processing,
    /// Job finished and produced a result.
    Succeeded,
    /// Job finished without a result.
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ============================================================================
// Job
// ============================================================================

/// Snapshot of a job record in the backend store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Backend-assigned identifier.
    pub id: JobId,

    /// The submitted URL.
    pub url: String,

    /// Current processing status.
    pub status: JobStatus,

    /// Result text, present once processing succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// Failure message, present when processing failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Creates a new `Pending` job with the current timestamp.
    #[must_use]
    pub fn pending(id: JobId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            status: JobStatus::Pending,
            result: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    /// Applies a backend-side update to this record.
    ///
    /// Fields absent from the update keep their previous value.
    pub fn apply(&mut self, update: &JobUpdate) {
        self.status = update.status;
        if update.result.is_some() {
            self.result.clone_from(&update.result);
        }
        if update.error_message.is_some() {
            self.error_message.clone_from(&update.error_message);
        }
    }

    /// Builds the change event a subscriber would receive for this record.
    #[must_use]
    pub fn change_event(&self) -> ChangeEvent {
        ChangeEvent {
            job_id: self.id.clone(),
            status: self.status,
            result: self.result.clone(),
            error_message: self.error_message.clone(),
        }
    }
}

/// A backend-side modification of a job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    /// New processing status.
    pub status: JobStatus,

    /// Result text to record.
    #[serde(default)]
    pub result: Option<String>,

    /// Failure message to record.
    #[serde(default)]
    pub error_message: Option<String>,
}

impl JobUpdate {
    /// An update that only moves the status forward.
    #[must_use]
    pub const fn status(status: JobStatus) -> Self {
        Self {
            status,
            result: None,
            error_message: None,
        }
    }

    /// A successful completion carrying a result.
    #[must_use]
    pub fn succeeded(result: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Succeeded,
            result: Some(result.into()),
            error_message: None,
        }
    }

    /// A failed completion carrying a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            result: None,
            error_message: Some(message.into()),
        }
    }
}

// ============================================================================
// ChangeEvent
// ============================================================================

/// A change notification for one job, delivered at-least-once by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// The job this change belongs to.
    pub job_id: JobId,

    /// Status after the change.
    pub status: JobStatus,

    /// Result text, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// Failure message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// The outcome carried by a terminal change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum TerminalOutcome {
    /// The job produced a result.
    Succeeded(String),
    /// The job failed with the given message.
    Failed(String),
}

impl ChangeEvent {
    /// Returns the terminal outcome if this event ends the listening lifecycle.
    ///
    /// A non-empty result wins over any status; otherwise a `Failed` status is
    /// terminal. Everything else is a progress update.
    ///
    /// # Examples
    ///
    /// ```
    /// use jobwatch_orchestrator::{ChangeEvent, JobId, JobStatus, TerminalOutcome};
    ///
    /// let event = ChangeEvent {
    ///     job_id: JobId::new("42"),
    ///     status: JobStatus::Failed,
    ///     result: None,
    ///     error_message: None,
    /// };
    /// assert_eq!(
    ///     event.terminal_outcome(),
    ///     Some(TerminalOutcome::Failed("Unknown error".to_string()))
    /// );
    /// ```
    #[must_use]
    pub fn terminal_outcome(&self) -> Option<TerminalOutcome> {
        if let Some(result) = self.result.as_deref().filter(|r| !r.is_empty()) {
            return Some(TerminalOutcome::Succeeded(result.to_string()));
        }
        if self.status == JobStatus::Failed {
            let message = self
                .error_message
                .as_deref()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(UNKNOWN_FAILURE);
            return Some(TerminalOutcome::Failed(message.to_string()));
        }
        None
    }

    /// Returns `true` if this event ends the listening lifecycle.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.terminal_outcome().is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================
