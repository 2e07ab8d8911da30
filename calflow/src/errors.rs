//! Error types for the calflow pipeline.
//!
//! Every failure the orchestration layer can produce is a variant of
//! [`CalflowError`]. The HTTP boundary maps each variant to a status code in
//! `server::error`; the taxonomy name returned by [`CalflowError::kind`] is
//! what ends up in structured logs.

use crate::core::{ArtifactKind, ExitReason, StageName};
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = CalflowError> = std::result::Result<T, E>;

/// The main error type for calflow operations.
#[derive(Debug, Error)]
pub enum CalflowError {
    /// The user identifier failed path-safety validation.
    #[error("{0}")]
    InvalidIdentifier(#[from] InvalidIdentifierError),

    /// The worker executable was missing or could not be started.
    #[error("failed to spawn worker for stage '{stage}': {source}")]
    WorkerSpawn {
        /// Stage whose worker failed to start.
        stage: StageName,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The worker exited non-zero, crashed or was killed.
    #[error("stage '{stage}' failed: {reason}")]
    WorkerExit {
        /// Stage whose worker failed.
        stage: StageName,
        /// Exit reason including captured diagnostics.
        reason: ExitReason,
    },

    /// The worker did not finish within its time budget.
    #[error(
        "stage '{stage}' timed out after {}s{}",
        timeout.as_secs(),
        detail(diagnostics)
    )]
    WorkerTimeout {
        /// Stage whose worker hung.
        stage: StageName,
        /// The budget that was exceeded.
        timeout: Duration,
        /// Whatever the worker wrote to stderr before it was killed.
        diagnostics: String,
    },

    /// The worker exited successfully but a required output file is absent.
    #[error("stage '{stage}' succeeded but did not produce '{file}'")]
    MissingOutput {
        /// Stage that should have produced the file.
        stage: StageName,
        /// Expected file name inside the run's scratch directory.
        file: String,
    },

    /// No stored artifact exists for the requested key.
    #[error("no {kind} artifact stored for user '{user}'")]
    ArtifactNotFound {
        /// The user the artifact was requested for.
        user: String,
        /// The requested artifact kind.
        kind: ArtifactKind,
    },

    /// Another run for the same user holds the run guard.
    #[error("a pipeline run is already in progress for user '{user}'")]
    RunInProgress {
        /// The contended user.
        user: String,
    },

    /// The run was cancelled before it could finish.
    #[error("pipeline run cancelled: {0}")]
    Cancelled(String),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A generic internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CalflowError {
    /// Returns the taxonomy name of this error, used as a log field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier(_) => "InvalidIdentifier",
            Self::WorkerSpawn { .. } => "WorkerSpawnFailure",
            Self::WorkerExit { .. } => "WorkerExitFailure",
            Self::WorkerTimeout { .. } => "WorkerTimeout",
            Self::MissingOutput { .. } => "MissingOutput",
            Self::ArtifactNotFound { .. } => "ArtifactNotFound",
            Self::RunInProgress { .. } => "ConcurrentWriteRace",
            Self::Cancelled(_) => "Cancelled",
            Self::Config(_) => "Config",
            Self::Internal(_) => "Internal",
            Self::Io(_) => "Io",
        }
    }

    /// Returns the pipeline stage this error originated from, if any.
    #[must_use]
    pub fn stage(&self) -> Option<StageName> {
        match self {
            Self::WorkerSpawn { stage, .. }
            | Self::WorkerExit { stage, .. }
            | Self::WorkerTimeout { stage, .. }
            | Self::MissingOutput { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Formats captured stderr as a `": text"` suffix, or nothing when empty.
pub(crate) fn detail(diagnostics: &str) -> String {
    let diagnostics = diagnostics.trim();
    if diagnostics.is_empty() {
        String::new()
    } else {
        format!(": {diagnostics}")
    }
}

/// Error raised when a user identifier is not safe to use as a path component.
#[derive(Debug, Clone, Error)]
#[error("invalid user identifier '{value}': {reason}")]
pub struct InvalidIdentifierError {
    /// The offending value, truncated for display.
    pub value: String,
    /// Why the value was rejected.
    pub reason: &'static str,
}

impl InvalidIdentifierError {
    const DISPLAY_LIMIT: usize = 64;

    /// Creates a new invalid identifier error.
    #[must_use]
    pub fn new(value: &str, reason: &'static str) -> Self {
        Self {
            value: value.chars().take(Self::DISPLAY_LIMIT).collect(),
            reason,
        }
    }
}
