//! Timetable acquisition stage.

use super::{DeclaredOutput, Stage, StageContext};
use crate::core::{ArtifactKind, StageName};
use crate::runner::{StageRequest, WorkerCommand};

const OUTPUTS: [DeclaredOutput; 1] = [DeclaredOutput {
    kind: ArtifactKind::Timetable,
    required: true,
}];

/// Answers the security question, scrapes the timetable and writes
/// `{user}.json` into the scratch directory. Its stdout is a signal only.
///
/// Arguments: `(user, password, answer, session_token, tempstore_dir)`.
#[derive(Debug, Clone)]
pub struct TimetableStage {
    command: WorkerCommand,
}

impl TimetableStage {
    /// Creates the stage around a worker command.
    #[must_use]
    pub fn new(command: WorkerCommand) -> Self {
        Self { command }
    }
}

impl Stage for TimetableStage {
    fn name(&self) -> StageName {
        StageName::Timetable
    }

    fn build_request(&self, ctx: &StageContext<'_>) -> StageRequest {
        let builder = ctx.request(self.name(), &self.command).arg(ctx.user.as_str());
        let builder = match ctx.credentials {
            Some(creds) => builder
                .secret_arg(creds.password())
                .secret_arg(creds.answer())
                .secret_arg(creds.session_token()),
            None => builder.arg("").arg("").arg(""),
        };
        builder.path_arg(ctx.scratch_dir).build()
    }

    fn outputs(&self) -> &[DeclaredOutput] {
        &OUTPUTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::Fixture;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_arguments_in_contract_order() {
        let fixture = Fixture::new();
        let stage = TimetableStage::new(WorkerCommand::new("scrape"));
        let request = stage.build_request(&fixture.ctx(true));

        assert_eq!(
            request.args(),
            &["12345", "hunter2", "blue", "sess-1", "/data/tmp/12345/run"]
        );
        assert_eq!(
            request.display_args(),
            vec!["12345", "[redacted]", "[redacted]", "[redacted]", "/data/tmp/12345/run"]
        );
    }

    #[test]
    fn test_declares_required_timetable() {
        let stage = TimetableStage::new(WorkerCommand::new("scrape"));
        assert_eq!(stage.outputs(), &[DeclaredOutput::required(ArtifactKind::Timetable)]);
    }
}
