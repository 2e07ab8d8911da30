//! Stage trait and the three pipeline stages.
//!
//! A stage is a capability over one external worker: it knows how to build
//! the worker's argument vector for a run and which files the worker is
//! expected to leave in the run's scratch directory. Executing and
//! supervising the process is the runner's job; sequencing is the
//! orchestrator's.

mod calendar;
mod credentials;
mod security_question;
mod timetable;

pub use calendar::CalendarStage;
pub use credentials::PortalCredentials;
pub use security_question::SecurityQuestionStage;
pub use timetable::TimetableStage;

use crate::core::{ArtifactKind, StageName, UserIdentifier};
use crate::runner::{StageRequest, StageRequestBuilder, WorkerCommand};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Everything a stage may need to build its worker invocation.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// The user this run belongs to.
    pub user: &'a UserIdentifier,
    /// Run identifier (also exported to the worker environment).
    pub run_id: Uuid,
    /// Per-run scratch directory.
    pub scratch_dir: &'a Path,
    /// Durable directory holding cached portal cookies.
    pub cookie_dir: &'a Path,
    /// Directory holding the worker scripts.
    pub script_dir: &'a Path,
    /// Artifact store root.
    pub artifact_root: &'a Path,
    /// Portal credentials, present only for the timetable stage.
    pub credentials: Option<&'a PortalCredentials>,
    /// Time budget for the worker.
    pub timeout: Duration,
}

impl StageContext<'_> {
    /// Starts a request with the environment every worker receives.
    #[must_use]
    pub fn request(&self, stage: StageName, command: &WorkerCommand) -> StageRequestBuilder {
        StageRequest::builder(stage, command)
            .workdir(self.script_dir)
            .timeout(self.timeout)
            .env("CALFLOW_USER", self.user.as_str())
            .env("CALFLOW_RUN_ID", self.run_id.to_string())
            .env("CALFLOW_SCRATCH_DIR", self.scratch_dir.to_string_lossy())
            .env("CALFLOW_ARTIFACT_ROOT", self.artifact_root.to_string_lossy())
    }
}

/// A file a stage's worker leaves in the scratch directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclaredOutput {
    /// Store kind the file is promoted to.
    pub kind: ArtifactKind,
    /// Whether the run fails when the file is missing.
    pub required: bool,
}

impl DeclaredOutput {
    /// A required output.
    #[must_use]
    pub fn required(kind: ArtifactKind) -> Self {
        Self { kind, required: true }
    }

    /// An optional output.
    #[must_use]
    pub fn optional(kind: ArtifactKind) -> Self {
        Self {
            kind,
            required: false,
        }
    }

    /// Where the worker is expected to write this output.
    #[must_use]
    pub fn scratch_file(&self, scratch_dir: &Path, user: &UserIdentifier) -> PathBuf {
        scratch_dir.join(self.kind.file_name(user.as_str()))
    }
}

/// Trait for pipeline stages.
pub trait Stage: Send + Sync + Debug {
    /// Returns the stage name.
    fn name(&self) -> StageName;

    /// Builds the worker invocation for one run.
    fn build_request(&self, ctx: &StageContext<'_>) -> StageRequest;

    /// Files the worker leaves in the scratch directory on success.
    fn outputs(&self) -> &[DeclaredOutput] {
        &[]
    }
}
