//! Immutable description of one worker invocation.

use crate::core::StageName;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-stage time budget.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// The executable selector for a stage: a program plus fixed leading
/// arguments (typically an interpreter and a script path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    /// Program to execute, resolved through `PATH` when not absolute.
    pub program: String,
    /// Arguments placed before the stage's positional arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Creates a worker command with no leading arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends a leading argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Shorthand for `interpreter script`.
    #[must_use]
    pub fn script(interpreter: impl Into<String>, script: impl AsRef<Path>) -> Self {
        Self::new(interpreter).with_arg(script.as_ref().to_string_lossy())
    }
}

/// An immutable worker invocation: program, ordered arguments, working
/// directory, extra environment and time budget.
#[derive(Clone, PartialEq, Eq)]
pub struct StageRequest {
    stage: StageName,
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
    env: Vec<(String, String)>,
    timeout: Duration,
    redacted: Vec<usize>,
}

impl StageRequest {
    /// Starts building a request for `stage` using `command`.
    #[must_use]
    pub fn builder(stage: StageName, command: &WorkerCommand) -> StageRequestBuilder {
        StageRequestBuilder {
            request: Self {
                stage,
                program: command.program.clone(),
                args: command.args.clone(),
                workdir: PathBuf::from("."),
                env: Vec::new(),
                timeout: DEFAULT_STAGE_TIMEOUT,
                redacted: Vec::new(),
            },
        }
    }

    /// Stage this request belongs to.
    #[must_use]
    pub fn stage(&self) -> StageName {
        self.stage
    }

    /// Program to execute.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full argument vector (leading command args, then positional args).
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Working directory for the process.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Additional environment variables.
    #[must_use]
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Time budget before the worker is killed.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Argument vector with secret positions replaced, safe for logs.
    #[must_use]
    pub fn display_args(&self) -> Vec<String> {
        self.args
            .iter()
            .enumerate()
            .map(|(i, arg)| {
                if self.redacted.contains(&i) {
                    "[redacted]".to_string()
                } else {
                    arg.clone()
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for StageRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRequest")
            .field("stage", &self.stage)
            .field("program", &self.program)
            .field("args", &self.display_args())
            .field("workdir", &self.workdir)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`StageRequest`].
#[derive(Debug)]
pub struct StageRequestBuilder {
    request: StageRequest,
}

impl StageRequestBuilder {
    /// Appends a positional argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.request.args.push(arg.into());
        self
    }

    /// Appends a path argument.
    #[must_use]
    pub fn path_arg(self, path: impl AsRef<Path>) -> Self {
        let arg = path.as_ref().to_string_lossy().into_owned();
        self.arg(arg)
    }

    /// Appends a positional argument that must never appear in logs.
    #[must_use]
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.request.redacted.push(self.request.args.len());
        self.request.args.push(arg.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.request.workdir = dir.into();
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.env.push((key.into(), value.into()));
        self
    }

    /// Sets the time budget.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = timeout;
        self
    }

    /// Finishes the request.
    #[must_use]
    pub fn build(self) -> StageRequest {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_argument_order() {
        let command = WorkerCommand::script("python3", "scripts/timetable.py");
        let request = StageRequest::builder(StageName::Timetable, &command)
            .arg("12345")
            .secret_arg("hunter2")
            .arg("blue")
            .path_arg("/tmp/run")
            .build();

        assert_eq!(request.program(), "python3");
        assert_eq!(
            request.args(),
            &["scripts/timetable.py", "12345", "hunter2", "blue", "/tmp/run"]
        );
        assert_eq!(request.timeout(), DEFAULT_STAGE_TIMEOUT);
    }

    #[test]
    fn test_secret_args_redacted_in_debug() {
        let request = StageRequest::builder(StageName::Timetable, &WorkerCommand::new("w"))
            .arg("12345")
            .secret_arg("hunter2")
            .build();

        assert_eq!(request.display_args(), vec!["12345", "[redacted]"]);
        assert!(!format!("{request:?}").contains("hunter2"));
    }
}
