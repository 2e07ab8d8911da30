//! Security-question retrieval stage.

use super::{Stage, StageContext};
use crate::core::{StageName, StageResult};
use crate::runner::{StageRequest, WorkerCommand};

/// Logs in with the user identifier and returns the portal's security
/// question. The worker caches its portal cookies under the cookie
/// directory for the timetable stage.
///
/// Arguments: `(user, cookie_dir)`.
#[derive(Debug, Clone)]
pub struct SecurityQuestionStage {
    command: WorkerCommand,
}

impl SecurityQuestionStage {
    /// Creates the stage around a worker command.
    #[must_use]
    pub fn new(command: WorkerCommand) -> Self {
        Self { command }
    }

    /// Extracts the question text from the worker's output.
    ///
    /// Blank lines are dropped; an all-blank output yields `None`.
    #[must_use]
    pub fn question(result: &StageResult) -> Option<String> {
        let lines: Vec<&str> = result
            .lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect();
        (!lines.is_empty()).then(|| lines.join("\n"))
    }
}

impl Stage for SecurityQuestionStage {
    fn name(&self) -> StageName {
        StageName::SecurityQuestion
    }

    fn build_request(&self, ctx: &StageContext<'_>) -> StageRequest {
        ctx.request(self.name(), &self.command)
            .arg(ctx.user.as_str())
            .path_arg(ctx.cookie_dir)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::Fixture;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_arguments() {
        let fixture = Fixture::new();
        let stage = SecurityQuestionStage::new(WorkerCommand::script("python3", "question.py"));
        let request = stage.build_request(&fixture.ctx(false));

        assert_eq!(request.args(), &["question.py", "12345", "/data/cookies"]);
        assert!(stage.outputs().is_empty());
    }

    #[test]
    fn test_question_extraction() {
        let result = StageResult::success(
            StageName::SecurityQuestion,
            vec!["".into(), "  Name of your first pet?  ".into(), "".into()],
            Duration::ZERO,
        );
        assert_eq!(
            SecurityQuestionStage::question(&result).as_deref(),
            Some("Name of your first pet?")
        );

        let empty =
            StageResult::success(StageName::SecurityQuestion, vec![" ".into()], Duration::ZERO);
        assert_eq!(SecurityQuestionStage::question(&empty), None);
    }
}
