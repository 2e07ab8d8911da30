//! Calendar-file generation stage.

use super::{DeclaredOutput, Stage, StageContext};
use crate::core::{ArtifactKind, StageName};
use crate::runner::{StageRequest, WorkerCommand};

const OUTPUTS: [DeclaredOutput; 2] = [
    DeclaredOutput {
        kind: ArtifactKind::CalendarFile,
        required: true,
    },
    DeclaredOutput {
        kind: ArtifactKind::TimetableView,
        required: false,
    },
];

/// Turns the scraped timetable in the scratch directory into `{user}.ics`
/// (and optionally `{user}.html`). Each stdout line is progress text that is
/// echoed to the caller as it is produced.
///
/// Arguments: `(user, tempdir, scriptdir)`.
#[derive(Debug, Clone)]
pub struct CalendarStage {
    command: WorkerCommand,
}

impl CalendarStage {
    /// Creates the stage around a worker command.
    #[must_use]
    pub fn new(command: WorkerCommand) -> Self {
        Self { command }
    }
}

impl Stage for CalendarStage {
    fn name(&self) -> StageName {
        StageName::Calendar
    }

    fn build_request(&self, ctx: &StageContext<'_>) -> StageRequest {
        ctx.request(self.name(), &self.command)
            .arg(ctx.user.as_str())
            .path_arg(ctx.scratch_dir)
            .path_arg(ctx.script_dir)
            .build()
    }

    fn outputs(&self) -> &[DeclaredOutput] {
        &OUTPUTS
    }
}
