//! Pipeline orchestrator.

use super::guard::{OverlapPolicy, RunPermit, UserRunGuard};
use super::session::{PipelineSession, RunSummary};
use super::state::RunKind;
use crate::core::{
    ArtifactKind, ExitKind, ExitReason, StageName, StageResult, StageStatus, UserIdentifier,
};
use crate::errors::{detail, CalflowError};
use crate::events::{
    EventSink, NoOpEventSink, ARTIFACT_STORED, RUN_ABORTED, RUN_COMPLETED, RUN_OVERLAP,
    RUN_STARTED, STAGE_COMPLETED, STAGE_FAILED, STAGE_STARTED,
};
use crate::runner::{StageRunner, WorkerCommand, DEFAULT_STAGE_TIMEOUT};
use crate::observability::SpanTimer;
use crate::stages::{
    CalendarStage, PortalCredentials, SecurityQuestionStage, Stage, StageContext, TimetableStage,
};
use crate::store::ArtifactStore;
use futures::Stream;
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Working directory of every worker, also passed to the calendar worker.
    pub script_dir: PathBuf,
    /// Time budget per stage.
    pub stage_timeout: Duration,
    /// What to do with overlapping runs for the same user.
    pub overlap_policy: OverlapPolicy,
    /// Keep the scratch directory of failed runs for inspection.
    pub keep_failed_scratch: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            script_dir: PathBuf::from("scripts"),
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            overlap_policy: OverlapPolicy::Wait,
            keep_failed_scratch: true,
        }
    }
}

/// The three stages, one per worker.
#[derive(Debug, Clone)]
pub struct PipelineStages {
    /// Stage 1.
    pub security_question: Arc<dyn Stage>,
    /// Stage 2.
    pub timetable: Arc<dyn Stage>,
    /// Stage 3.
    pub calendar: Arc<dyn Stage>,
}

impl PipelineStages {
    /// Builds the standard stages around their worker commands.
    #[must_use]
    pub fn new(
        security_question: WorkerCommand,
        timetable: WorkerCommand,
        calendar: WorkerCommand,
    ) -> Self {
        Self {
            security_question: Arc::new(SecurityQuestionStage::new(security_question)),
            timetable: Arc::new(TimetableStage::new(timetable)),
            calendar: Arc::new(CalendarStage::new(calendar)),
        }
    }

    fn get(&self, name: StageName) -> &dyn Stage {
        match name {
            StageName::SecurityQuestion => self.security_question.as_ref(),
            StageName::Timetable => self.timetable.as_ref(),
            StageName::Calendar => self.calendar.as_ref(),
        }
    }
}

/// Something a streaming run reports to its caller.
#[derive(Debug)]
pub enum RunEvent {
    /// A line of calendar-stage output.
    Line(String),
    /// The run reached a terminal state. Always the last event.
    Finished(Result<RunSummary, CalflowError>),
}

/// Receiving end of a streaming timetable run.
///
/// Dropping the handle cancels the run and kills its worker.
#[derive(Debug)]
pub struct RunHandle {
    events: mpsc::UnboundedReceiver<RunEvent>,
    cancel: CancellationToken,
}

impl RunHandle {
    /// Waits for the next event. Returns `None` after `Finished`.
    pub async fn next(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Cancels the run without dropping the handle.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Turns the handle into a stream of events. Dropping the stream cancels
    /// the run.
    pub fn into_stream(self) -> impl Stream<Item = RunEvent> + Send {
        futures::stream::unfold(self, |mut handle| async move {
            handle.next().await.map(|event| (event, handle))
        })
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn join_run(
    run: JoinHandle<Result<RunSummary, CalflowError>>,
) -> Result<RunSummary, CalflowError> {
    run.await
        .map_err(|e| CalflowError::Internal(format!("pipeline run task failed: {e}")))?
}

/// Sequences the stages for one user, promotes their outputs into the
/// artifact store and enforces one run per user at a time.
pub struct Orchestrator {
    store: ArtifactStore,
    runner: Arc<dyn StageRunner>,
    stages: PipelineStages,
    guard: UserRunGuard,
    events: Arc<dyn EventSink>,
    settings: PipelineSettings,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store)
            .field("runner", &self.runner)
            .field("stages", &self.stages)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator that discards lifecycle events.
    #[must_use]
    pub fn new(
        store: ArtifactStore,
        runner: Arc<dyn StageRunner>,
        stages: PipelineStages,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            runner,
            stages,
            guard: UserRunGuard::new(),
            events: Arc::new(NoOpEventSink),
            settings,
        }
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The artifact store runs write into.
    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// The orchestrator's settings.
    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Returns true if a run for `user` is in flight.
    #[must_use]
    pub fn is_running(&self, user: &UserIdentifier) -> bool {
        self.guard.is_running(user)
    }

    /// Number of users with a run in flight or queued.
    #[must_use]
    pub fn active_runs(&self) -> usize {
        self.guard.active_users()
    }

    /// Runs stage 1 for `user`, caches the question text as the user's
    /// `SecurityQuestion` artifact and returns it.
    ///
    /// Dropping the returned future cancels the worker; the run itself still
    /// concludes in the background and reports `run.aborted`.
    pub async fn security_question(
        self: &Arc<Self>,
        user: &UserIdentifier,
    ) -> Result<String, CalflowError> {
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();

        let run = self.spawn_run(user.clone(), RunKind::SecurityQuestion, None, cancel, |_| {});
        let summary = join_run(run).await?;
        summary.question.ok_or_else(|| {
            CalflowError::Internal("security-question run finished without a question".into())
        })
    }

    /// Runs stages 2 and 3 for `user` and waits for the whole run.
    ///
    /// Stage 3 never starts unless stage 2 succeeded and its timetable was
    /// stored. Dropping the returned future cancels the running worker.
    pub async fn run_timetable(
        self: &Arc<Self>,
        user: &UserIdentifier,
        credentials: &PortalCredentials,
    ) -> Result<RunSummary, CalflowError> {
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();

        let run = self.spawn_run(
            user.clone(),
            RunKind::Timetable,
            Some(credentials.clone()),
            cancel,
            |_| {},
        );
        join_run(run).await
    }

    /// Starts stages 2 and 3 for `user` in the background.
    ///
    /// Calendar-stage stdout lines are forwarded as [`RunEvent::Line`] while
    /// the worker runs, followed by exactly one [`RunEvent::Finished`].
    pub fn start_timetable_run(
        self: &Arc<Self>,
        user: UserIdentifier,
        credentials: PortalCredentials,
    ) -> RunHandle {
        let (tx, events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let line_tx = tx.clone();

        let run = self.spawn_run(
            user,
            RunKind::Timetable,
            Some(credentials),
            cancel.clone(),
            move |line| {
                let _ = line_tx.send(RunEvent::Line(line));
            },
        );
        tokio::spawn(async move {
            let outcome = join_run(run).await;
            if tx.send(RunEvent::Finished(outcome)).is_err() {
                debug!("run finished after its caller went away");
            }
        });

        RunHandle { events, cancel }
    }

    /// Runs one pipeline run on its own task so it always concludes, even
    /// when the caller stops waiting for it.
    fn spawn_run<F>(
        self: &Arc<Self>,
        user: UserIdentifier,
        kind: RunKind,
        credentials: Option<PortalCredentials>,
        cancel: CancellationToken,
        on_line: F,
    ) -> JoinHandle<Result<RunSummary, CalflowError>>
    where
        F: FnMut(String) + Send + 'static,
    {
        let this = Arc::clone(self);
        let span = info_span!("pipeline_run", user = %user, kind = %kind);
        tokio::spawn(
            async move {
                this.execute(&user, kind, credentials.as_ref(), cancel, on_line).await
            }
            .instrument(span),
        )
    }

    async fn execute<F>(
        &self,
        user: &UserIdentifier,
        kind: RunKind,
        credentials: Option<&PortalCredentials>,
        cancel: CancellationToken,
        on_line: F,
    ) -> Result<RunSummary, CalflowError>
    where
        F: FnMut(String) + Send,
    {
        let _permit = self.admit(user, &cancel).await?;
        let timer = SpanTimer::start(kind.to_string());

        let mut session = PipelineSession::new(user.clone(), kind);
        info!(run_id = %session.run_id(), user = %user, kind = %kind, "run started");
        self.events
            .emit(
                RUN_STARTED,
                Some(json!({
                    "run_id": session.run_id(),
                    "user": user.as_str(),
                    "kind": kind.to_string(),
                })),
            )
            .await;

        let outcome = match self.store.create_scratch_dir(user, session.run_id()).await {
            Ok(scratch) => {
                self.drive(&mut session, &scratch, credentials, &cancel, on_line)
                    .await
            }
            Err(e) => Err(e),
        };

        self.conclude(session, outcome, &timer).await
    }

    async fn admit(
        &self,
        user: &UserIdentifier,
        cancel: &CancellationToken,
    ) -> Result<RunPermit, CalflowError> {
        let policy = self.settings.overlap_policy;
        let queued_at = Instant::now();

        let acquired = tokio::select! {
            acquired = self.guard.acquire(user, policy) => acquired,
            () = cancel.cancelled() => {
                return Err(CalflowError::Cancelled(format!(
                    "run for user '{user}' cancelled while queued"
                )));
            }
        };

        match acquired {
            Ok(admission) => {
                if admission.overlapped {
                    let waited_ms =
                        u64::try_from(queued_at.elapsed().as_millis()).unwrap_or(u64::MAX);
                    warn!(
                        user = %user,
                        waited_ms,
                        "run waited for an earlier run of the same user"
                    );
                    self.events
                        .emit(
                            RUN_OVERLAP,
                            Some(json!({
                                "user": user.as_str(),
                                "policy": "wait",
                                "waited_ms": waited_ms,
                            })),
                        )
                        .await;
                }
                Ok(admission.permit)
            }
            Err(err) => {
                warn!(user = %user, "run rejected, another run for this user is in progress");
                self.events
                    .emit(
                        RUN_OVERLAP,
                        Some(json!({ "user": user.as_str(), "policy": "reject" })),
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn drive<F>(
        &self,
        session: &mut PipelineSession,
        scratch: &Path,
        credentials: Option<&PortalCredentials>,
        cancel: &CancellationToken,
        mut on_line: F,
    ) -> Result<(), CalflowError>
    where
        F: FnMut(String) + Send,
    {
        let mut discard = |_: String| {};

        while let Some(name) = session.state().stage() {
            let stage = self.stages.get(name);
            match name {
                StageName::SecurityQuestion => {
                    let result = self
                        .run_stage(session, stage, scratch, None, cancel, &mut discard)
                        .await?;
                    let question = SecurityQuestionStage::question(&result).ok_or_else(|| {
                        let err = CalflowError::WorkerExit {
                            stage: name,
                            reason: ExitReason::new(
                                ExitKind::OutputError,
                                "worker printed no question text",
                            ),
                        };
                        error!(run_id = %session.run_id(), stage = %name, "{err}");
                        err
                    })?;
                    let bytes = question.as_bytes();
                    self.store_artifact(session, ArtifactKind::SecurityQuestion, bytes).await?;
                    session.set_question(question);
                }
                StageName::Timetable => {
                    self.run_stage(session, stage, scratch, credentials, cancel, &mut discard)
                        .await?;
                }
                StageName::Calendar => {
                    self.run_stage(session, stage, scratch, None, cancel, &mut on_line)
                        .await?;
                }
            }
            session.advance()?;
        }
        Ok(())
    }

    async fn run_stage<F>(
        &self,
        session: &mut PipelineSession,
        stage: &dyn Stage,
        scratch: &Path,
        credentials: Option<&PortalCredentials>,
        cancel: &CancellationToken,
        on_line: &mut F,
    ) -> Result<StageResult, CalflowError>
    where
        F: FnMut(String) + Send,
    {
        let name = stage.name();
        let run_id = session.run_id();
        if cancel.is_cancelled() {
            return Err(CalflowError::Cancelled(format!(
                "run cancelled before stage '{name}'"
            )));
        }

        let cookie_dir = self.store.kind_dir(ArtifactKind::SecurityQuestion);
        let request = stage.build_request(&StageContext {
            user: session.user(),
            run_id,
            scratch_dir: scratch,
            cookie_dir: &cookie_dir,
            script_dir: &self.settings.script_dir,
            artifact_root: self.store.root(),
            credentials,
            timeout: self.settings.stage_timeout,
        });

        info!(run_id = %run_id, stage = %name, args = ?request.display_args(), "stage started");
        self.events
            .emit(
                STAGE_STARTED,
                Some(json!({
                    "run_id": run_id,
                    "user": session.user().as_str(),
                    "stage": name.as_str(),
                    "program": request.program(),
                    "args": request.display_args(),
                })),
            )
            .await;

        let mut running = match self.runner.spawn(request, cancel.clone()).await {
            Ok(running) => running,
            Err(err) => {
                self.stage_failed(session, name, &err).await;
                return Err(err);
            }
        };

        while let Some(line) = running.next_line().await {
            on_line(line);
        }
        let result = running.finish().await;
        session.record(&result);

        if let StageStatus::Failed(reason) = &result.status {
            let err = stage_error(name, reason);
            self.stage_failed(session, name, &err).await;
            return Err(err);
        }

        if let Err(err) = self.promote_outputs(session, stage, scratch).await {
            self.stage_failed(session, name, &err).await;
            return Err(err);
        }

        info!(
            run_id = %run_id,
            stage = %name,
            duration_ms = result.duration_ms(),
            lines = result.lines.len(),
            "stage completed"
        );
        self.events
            .emit(
                STAGE_COMPLETED,
                Some(json!({
                    "run_id": run_id,
                    "user": session.user().as_str(),
                    "stage": name.as_str(),
                    "duration_ms": result.duration_ms(),
                    "lines": result.lines.len(),
                })),
            )
            .await;

        Ok(result)
    }

    /// Copies the stage's declared outputs from scratch into the store.
    ///
    /// Required outputs are checked before anything is promoted, so a stage
    /// with a missing required output leaves the store untouched.
    async fn promote_outputs(
        &self,
        session: &mut PipelineSession,
        stage: &dyn Stage,
        scratch: &Path,
    ) -> Result<(), CalflowError> {
        let mut present = Vec::new();
        for output in stage.outputs() {
            let path = output.scratch_file(scratch, session.user());
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                present.push((output.kind, path));
            } else if output.required {
                return Err(CalflowError::MissingOutput {
                    stage: stage.name(),
                    file: output.kind.file_name(session.user().as_str()),
                });
            } else {
                debug!(stage = %stage.name(), kind = %output.kind, "optional output not produced");
            }
        }

        for (kind, path) in present {
            let user = session.user().clone();
            let stored = self.store.promote(&path, &user, kind).await?;
            self.artifact_stored(session, kind, &stored).await;
        }
        Ok(())
    }

    async fn store_artifact(
        &self,
        session: &mut PipelineSession,
        kind: ArtifactKind,
        bytes: &[u8],
    ) -> Result<(), CalflowError> {
        let user = session.user().clone();
        let stored = self.store.write(&user, kind, bytes).await?;
        self.artifact_stored(session, kind, &stored).await;
        Ok(())
    }

    async fn artifact_stored(
        &self,
        session: &mut PipelineSession,
        kind: ArtifactKind,
        path: &Path,
    ) {
        session.record_artifact(kind);
        self.events
            .emit(
                ARTIFACT_STORED,
                Some(json!({
                    "run_id": session.run_id(),
                    "user": session.user().as_str(),
                    "kind": kind.to_string(),
                    "path": path.display().to_string(),
                })),
            )
            .await;
    }

    async fn stage_failed(&self, session: &PipelineSession, stage: StageName, err: &CalflowError) {
        self.events
            .emit(
                STAGE_FAILED,
                Some(json!({
                    "run_id": session.run_id(),
                    "user": session.user().as_str(),
                    "stage": stage.as_str(),
                    "error_kind": err.kind(),
                    "error": err.to_string(),
                })),
            )
            .await;
    }

    async fn conclude(
        &self,
        mut session: PipelineSession,
        outcome: Result<(), CalflowError>,
        timer: &SpanTimer,
    ) -> Result<RunSummary, CalflowError> {
        let run_id = session.run_id();
        let user = session.user().clone();

        match outcome {
            Ok(()) => {
                self.discard_scratch(&user, run_id).await;
                let summary = session.into_summary();
                info!(
                    run_id = %run_id,
                    user = %user,
                    kind = timer.name(),
                    duration_ms = timer.elapsed_ms(),
                    artifacts = ?summary.artifacts,
                    "run completed"
                );
                self.events
                    .emit(RUN_COMPLETED, serde_json::to_value(&summary).ok())
                    .await;
                Ok(summary)
            }
            Err(err) => {
                session.abort(err.to_string());
                let stage = err.stage().map_or("-", |s| s.as_str());
                let cancelled = matches!(err, CalflowError::Cancelled(_));
                if cancelled {
                    warn!(
                        run_id = %run_id,
                        user = %user,
                        error = %err,
                        duration_ms = timer.elapsed_ms(),
                        "run cancelled"
                    );
                } else {
                    error!(
                        run_id = %run_id,
                        user = %user,
                        stage,
                        error_kind = err.kind(),
                        error = %err,
                        duration_ms = timer.elapsed_ms(),
                        "run aborted"
                    );
                }

                // A cancelled run has no worker failure worth inspecting.
                if self.settings.keep_failed_scratch && !cancelled {
                    let scratch = self.store.scratch_path(&user, run_id);
                    if tokio::fs::try_exists(&scratch).await.unwrap_or(false) {
                        info!(
                            run_id = %run_id,
                            path = %scratch.display(),
                            "keeping scratch directory of failed run"
                        );
                    }
                } else {
                    self.discard_scratch(&user, run_id).await;
                }

                self.events
                    .emit(
                        RUN_ABORTED,
                        Some(json!({
                            "run_id": run_id,
                            "user": user.as_str(),
                            "stage": err.stage().map(|s| s.as_str()),
                            "error_kind": err.kind(),
                            "error": err.to_string(),
                        })),
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn discard_scratch(&self, user: &UserIdentifier, run_id: Uuid) {
        if let Err(e) = self.store.remove_scratch_dir(user, run_id).await {
            warn!(run_id = %run_id, error = %e, "failed to remove scratch directory");
        }
    }
}

fn stage_error(stage: StageName, reason: &ExitReason) -> CalflowError {
    match reason.kind {
        ExitKind::TimedOut(timeout) => CalflowError::WorkerTimeout {
            stage,
            timeout,
            diagnostics: reason.diagnostics.clone(),
        },
        ExitKind::Cancelled => CalflowError::Cancelled(format!(
            "stage '{stage}' was interrupted{}",
            detail(&reason.diagnostics)
        )),
        ExitKind::Exited(_) | ExitKind::Signalled | ExitKind::OutputError => {
            CalflowError::WorkerExit {
                stage,
                reason: reason.clone(),
            }
        }
    }
}
