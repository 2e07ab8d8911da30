//! Request-scoped state of one run.

use super::state::{RunKind, RunState};
use crate::core::{ArtifactKind, StageName, StageResult, UserIdentifier};
use crate::errors::CalflowError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Outcome of one stage within a run.
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    /// Stage name.
    pub stage: StageName,
    /// Rendered terminal status.
    pub status: String,
    /// Number of stdout lines emitted.
    pub lines: usize,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
}

/// Serializable record of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: Uuid,
    /// The user the run belonged to.
    pub user: UserIdentifier,
    /// What started the run.
    pub kind: RunKind,
    /// Terminal state.
    pub state: RunState,
    /// Per-stage outcomes, in execution order.
    pub stages: Vec<StageOutcome>,
    /// Artifacts written by this run.
    pub artifacts: Vec<ArtifactKind>,
    /// Security-question text, for security-question runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

/// Transient state binding a user to the stage outcomes of one run.
///
/// Owned by a single task and dropped when the run's response completes.
#[derive(Debug)]
pub struct PipelineSession {
    run_id: Uuid,
    user: UserIdentifier,
    kind: RunKind,
    state: RunState,
    outcomes: Vec<StageOutcome>,
    artifacts: Vec<ArtifactKind>,
    question: Option<String>,
    started_at: DateTime<Utc>,
}

impl PipelineSession {
    /// Starts a session in the initial state for `kind`.
    #[must_use]
    pub fn new(user: UserIdentifier, kind: RunKind) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            user,
            kind,
            state: RunState::initial(kind),
            outcomes: Vec::new(),
            artifacts: Vec::new(),
            question: None,
            started_at: Utc::now(),
        }
    }

    /// Run identifier.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The user this run belongs to.
    #[must_use]
    pub fn user(&self) -> &UserIdentifier {
        &self.user
    }

    /// Run kind.
    #[must_use]
    pub fn kind(&self) -> RunKind {
        self.kind
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Records a stage's terminal result.
    pub fn record(&mut self, result: &StageResult) {
        self.outcomes.push(StageOutcome {
            stage: result.stage,
            status: result.status.to_string(),
            lines: result.lines.len(),
            duration_ms: result.duration_ms(),
        });
    }

    /// Records an artifact written by this run.
    pub fn record_artifact(&mut self, kind: ArtifactKind) {
        if !self.artifacts.contains(&kind) {
            self.artifacts.push(kind);
        }
    }

    /// Keeps the security-question text for the summary.
    pub fn set_question(&mut self, question: String) {
        self.question = Some(question);
    }

    /// Moves to the next state after the awaited stage succeeded.
    pub fn advance(&mut self) -> Result<&RunState, CalflowError> {
        self.state = self.state.next()?;
        Ok(&self.state)
    }

    /// Moves to `Aborted`. A session that is already terminal is left as is.
    pub fn abort(&mut self, reason: impl Into<String>) {
        if let Ok(aborted) = self.state.abort(reason) {
            self.state = aborted;
        }
    }

    /// Consumes the session into its summary.
    #[must_use]
    pub fn into_summary(self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            user: self.user,
            kind: self.kind,
            state: self.state,
            stages: self.outcomes,
            artifacts: self.artifacts,
            question: self.question,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session(kind: RunKind) -> PipelineSession {
        PipelineSession::new(UserIdentifier::parse("12345").unwrap(), kind)
    }

    #[test]
    fn test_full_timetable_session() {
        let mut s = session(RunKind::Timetable);
        assert_eq!(s.state(), &RunState::AwaitingTimetable);

        s.record(&StageResult::success(
            StageName::Timetable,
            vec!["ok".into()],
            Duration::from_millis(5),
        ));
        s.record_artifact(ArtifactKind::Timetable);
        assert_eq!(s.advance().unwrap(), &RunState::AwaitingCalendarFile);

        s.record(&StageResult::success(StageName::Calendar, Vec::new(), Duration::ZERO));
        s.record_artifact(ArtifactKind::CalendarFile);
        s.record_artifact(ArtifactKind::CalendarFile);
        assert_eq!(s.advance().unwrap(), &RunState::Done);

        let summary = s.into_summary();
        assert_eq!(summary.stages.len(), 2);
        assert_eq!(summary.stages[0].lines, 1);
        assert_eq!(
            summary.artifacts,
            vec![ArtifactKind::Timetable, ArtifactKind::CalendarFile]
        );
        assert!(summary.finished_at >= summary.started_at);
    }

    #[test]
    fn test_abort_is_sticky() {
        let mut s = session(RunKind::Timetable);
        s.abort("timetable worker exited with status 1");
        s.abort("second reason ignored");

        assert_eq!(
            s.state(),
            &RunState::Aborted("timetable worker exited with status 1".to_string())
        );
        assert!(s.advance().is_err());
    }

    #[test]
    fn test_run_ids_unique() {
        assert_ne!(
            session(RunKind::SecurityQuestion).run_id(),
            session(RunKind::SecurityQuestion).run_id()
        );
    }

    #[test]
    fn test_summary_serializes() {
        let mut s = session(RunKind::SecurityQuestion);
        s.set_question("Pet name?".into());
        s.advance().unwrap();

        let json = serde_json::to_value(s.into_summary()).unwrap();
        assert_eq!(json["user"], "12345");
        assert_eq!(json["kind"], "security_question");
        assert_eq!(json["state"]["state"], "done");
        assert_eq!(json["question"], "Pet name?");
    }
}
