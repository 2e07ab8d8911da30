//! Scripted stage runner.

use crate::core::{ArtifactKind, ExitKind, ExitReason, StageName, StageResult};
use crate::errors::CalflowError;
use crate::runner::{RunningStage, StageRequest, StageRunner};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
enum Outcome {
    Success,
    Fail(ExitReason),
    SpawnError,
}

/// One canned worker invocation.
#[derive(Debug, Clone)]
pub struct ScriptedStep {
    lines: Vec<String>,
    files: Vec<(ArtifactKind, Vec<u8>)>,
    delay: Duration,
    stderr: String,
    outcome: Outcome,
}

impl ScriptedStep {
    /// A worker that exits 0 without output.
    #[must_use]
    pub fn success() -> Self {
        Self {
            lines: Vec::new(),
            files: Vec::new(),
            delay: Duration::ZERO,
            stderr: String::new(),
            outcome: Outcome::Success,
        }
    }

    /// A worker that exits with `code` and writes `diagnostics` to stderr.
    #[must_use]
    pub fn exits(code: i32, diagnostics: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Fail(ExitReason::new(ExitKind::Exited(code), diagnostics)),
            ..Self::success()
        }
    }

    /// A worker whose executable cannot be started.
    #[must_use]
    pub fn spawn_error() -> Self {
        Self {
            outcome: Outcome::SpawnError,
            ..Self::success()
        }
    }

    /// Adds stdout lines, emitted in order.
    #[must_use]
    pub fn lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines.extend(lines.into_iter().map(Into::into));
        self
    }

    /// Makes the worker leave `bytes` in its scratch directory as `kind`.
    #[must_use]
    pub fn writes(mut self, kind: ArtifactKind, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.push((kind, bytes.into()));
        self
    }

    /// Stderr reported if the worker is timed out or cancelled during its delay.
    #[must_use]
    pub fn stderr(mut self, text: impl Into<String>) -> Self {
        self.stderr = text.into();
        self
    }

    /// Makes the worker take `delay` before emitting anything.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A [`StageRunner`] that replays queued [`ScriptedStep`]s per stage.
///
/// Stages with nothing queued succeed without output. Every request is
/// recorded. Delays honour the request's timeout and the cancellation token
/// the same way the process runner does.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    steps: Mutex<HashMap<StageName, VecDeque<ScriptedStep>>>,
    requests: Mutex<Vec<StageRequest>>,
}

impl ScriptedRunner {
    /// Creates a runner with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `step` for the next invocation of `stage`.
    #[must_use]
    pub fn on(self, stage: StageName, step: ScriptedStep) -> Self {
        self.push(stage, step);
        self
    }

    /// Queues `step` through a shared reference.
    pub fn push(&self, stage: StageName, step: ScriptedStep) {
        self.steps.lock().entry(stage).or_default().push_back(step);
    }

    /// Every request received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<StageRequest> {
        self.requests.lock().clone()
    }

    /// Number of times `stage` was spawned (including spawn failures).
    #[must_use]
    pub fn calls(&self, stage: StageName) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.stage() == stage)
            .count()
    }

    fn next_step(&self, stage: StageName) -> ScriptedStep {
        self.steps
            .lock()
            .get_mut(&stage)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(ScriptedStep::success)
    }
}

fn env_value<'a>(request: &'a StageRequest, key: &str) -> Option<&'a str> {
    request
        .env()
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[async_trait]
impl StageRunner for ScriptedRunner {
    async fn spawn(
        &self,
        request: StageRequest,
        cancel: CancellationToken,
    ) -> Result<RunningStage, CalflowError> {
        let stage = request.stage();
        self.requests.lock().push(request.clone());
        let step = self.next_step(stage);

        if matches!(step.outcome, Outcome::SpawnError) {
            return Err(CalflowError::WorkerSpawn {
                stage,
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("scripted spawn failure for '{}'", request.program()),
                ),
            });
        }

        let scratch = env_value(&request, "CALFLOW_SCRATCH_DIR").map(PathBuf::from);
        let user = env_value(&request, "CALFLOW_USER").unwrap_or_default().to_string();
        let timeout = request.timeout();
        let (tx, rx) = mpsc::unbounded_channel();

        let outcome = tokio::spawn(async move {
            let started = Instant::now();

            if !step.delay.is_zero() {
                let interrupted = tokio::select! {
                    () = tokio::time::sleep(step.delay.min(timeout)) => {
                        (step.delay > timeout).then_some(ExitKind::TimedOut(timeout))
                    }
                    () = cancel.cancelled() => Some(ExitKind::Cancelled),
                };
                if let Some(kind) = interrupted {
                    return StageResult::failed(
                        stage,
                        Vec::new(),
                        ExitReason::new(kind, step.stderr.clone()),
                        started.elapsed(),
                    );
                }
            }

            if let Some(scratch) = scratch {
                for (kind, bytes) in &step.files {
                    let path = scratch.join(kind.file_name(&user));
                    if let Err(e) = tokio::fs::write(&path, bytes).await {
                        return StageResult::failed(
                            stage,
                            Vec::new(),
                            ExitReason::new(ExitKind::Exited(1), e.to_string()),
                            started.elapsed(),
                        );
                    }
                }
            }

            for line in &step.lines {
                let _ = tx.send(line.clone());
            }

            match step.outcome {
                Outcome::Fail(reason) => {
                    StageResult::failed(stage, step.lines, reason, started.elapsed())
                }
                Outcome::Success | Outcome::SpawnError => {
                    StageResult::success(stage, step.lines, started.elapsed())
                }
            }
        });

        Ok(RunningStage::new(stage, rx, outcome))
    }
}
