//! Stage runner: launches one external worker and reports its outcome.
//!
//! A runner turns an immutable [`StageRequest`] into a [`RunningStage`].
//! Output lines are available as they arrive through
//! [`RunningStage::next_line`]; the terminal [`StageResult`] is available
//! once through [`RunningStage::finish`]. No retries happen here.

mod process;
mod request;

pub use process::ProcessRunner;
pub use request::{StageRequest, StageRequestBuilder, WorkerCommand, DEFAULT_STAGE_TIMEOUT};

use crate::core::{ExitKind, ExitReason, StageName, StageResult};
use crate::errors::CalflowError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Trait for components that can execute a stage request.
#[async_trait]
pub trait StageRunner: Send + Sync + Debug {
    /// Starts the worker described by `request`.
    ///
    /// Returns `WorkerSpawn` if the process could not be started. Any later
    /// failure (non-zero exit, timeout, cancellation) is reported through the
    /// returned handle's [`StageResult`], never as an `Err` here.
    async fn spawn(
        &self,
        request: StageRequest,
        cancel: CancellationToken,
    ) -> Result<RunningStage, CalflowError>;
}

/// Handle to an in-flight worker.
#[derive(Debug)]
pub struct RunningStage {
    stage: StageName,
    lines: mpsc::UnboundedReceiver<String>,
    outcome: JoinHandle<StageResult>,
}

impl RunningStage {
    /// Wraps a line receiver and the task that will produce the result.
    #[must_use]
    pub fn new(
        stage: StageName,
        lines: mpsc::UnboundedReceiver<String>,
        outcome: JoinHandle<StageResult>,
    ) -> Self {
        Self {
            stage,
            lines,
            outcome,
        }
    }

    /// Returns the stage this handle belongs to.
    #[must_use]
    pub fn stage(&self) -> StageName {
        self.stage
    }

    /// Returns the next stdout line, or `None` once the worker closed stdout.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Waits for the worker to exit and returns its result.
    ///
    /// Lines not yet consumed through [`next_line`](Self::next_line) are
    /// still part of the returned result.
    pub async fn finish(self) -> StageResult {
        let stage = self.stage;
        drop(self.lines);
        match self.outcome.await {
            Ok(result) => result,
            Err(join_error) => StageResult::failed(
                stage,
                Vec::new(),
                ExitReason::new(
                    ExitKind::OutputError,
                    format!("worker supervisor task ended abnormally: {join_error}"),
                ),
                Duration::ZERO,
            ),
        }
    }

    /// Whole-output mode: waits for every line and the exit status.
    pub async fn collect(self) -> StageResult {
        self.finish().await
    }
}
