//! Error types for the Jobwatch orchestrator.
//!
//! Every error is terminal to the current attempt: it is recorded in the
//! rendered state (or returned to the caller) and never retried internally.
//! A retry is always a new, user-initiated submission.

use std::path::PathBuf;

/// A specialized `Result` type for Jobwatch orchestrator operations.
pub type Result<T> = std::result::Result<T, JobwatchError>;

/// Errors that can occur while submitting and observing jobs.
#[derive(Debug, thiserror::Error)]
pub enum JobwatchError {
    // ========================================================================
    // Submission Pipeline Errors
    // ========================================================================
    /// The submitted URL was rejected before reaching the job store.
    ///
    /// Raised synchronously; no job is created and no state transition happens.
    #[error("{message}")]
    Validation {
        /// Human-readable reason shown to the user.
        message: String,
    },

    /// The job store refused or failed to create the job.
    #[error("{message}")]
    Submission {
        /// Human-readable reason shown to the user.
        message: String,
    },

    /// The live subscription could not be attached or was lost mid-flight.
    #[error("{message}")]
    Connection {
        /// Human-readable reason shown to the user.
        message: String,
    },

    /// The backend reported that processing of the job failed.
    #[error("Processing failed: {message}")]
    JobFailure {
        /// Failure message reported by the backend.
        message: String,
    },

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Invalid state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },

    /// The orchestrator actor is no longer running.
    #[error("Orchestrator is not running\n\nSuggestion: Restart the jobwatch server")]
    OrchestratorUnavailable,

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your jobwatch.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// I/O error while locating or reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobwatchError {
    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new `Submission` error.
    #[must_use]
    pub fn submission(message: impl Into<String>) -> Self {
        Self::Submission {
            message: message.into(),
        }
    }

    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `JobFailure` error.
    #[must_use]
    pub fn job_failure(message: impl Into<String>) -> Self {
        Self::JobFailure {
            message: message.into(),
        }
    }

    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns `true` if this error was raised before anything reached the job store.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Returns `true` if the server cannot start with this error.
    ///
    /// Configuration and I/O errors are fatal; attempt outcomes never are.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. } | Self::ConfigValidationError { .. } | Self::Io(_)
        )
    }
}
