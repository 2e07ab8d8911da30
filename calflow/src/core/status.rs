//! Stage names and terminal status types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Credential exchange that yields the portal's security question.
    SecurityQuestion,
    /// Timetable acquisition (scraping).
    Timetable,
    /// Calendar-file generation.
    Calendar,
}

impl StageName {
    /// Returns the stage name as a static string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecurityQuestion => "security_question",
            Self::Timetable => "timetable",
            Self::Calendar => "calendar",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a worker process ended when it did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ExitKind {
    /// Exited with a non-zero status code.
    Exited(i32),
    /// Terminated by a signal (no exit code).
    Signalled,
    /// Killed after exceeding its time budget.
    TimedOut(#[serde(with = "duration_secs")] Duration),
    /// Killed because the run was cancelled.
    Cancelled,
    /// Its output could not be read.
    OutputError,
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with status {code}"),
            Self::Signalled => write!(f, "terminated by signal"),
            Self::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs()),
            Self::Cancelled => write!(f, "cancelled"),
            Self::OutputError => write!(f, "output could not be read"),
        }
    }
}

/// Why a worker failed, with whatever it wrote to its diagnostic channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitReason {
    /// How the process ended.
    pub kind: ExitKind,
    /// Captured stderr text (possibly truncated, possibly empty).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diagnostics: String,
}

impl ExitReason {
    /// Creates a new exit reason.
    #[must_use]
    pub fn new(kind: ExitKind, diagnostics: impl Into<String>) -> Self {
        Self {
            kind,
            diagnostics: diagnostics.into(),
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let diagnostics = self.diagnostics.trim();
        if diagnostics.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {diagnostics}", self.kind)
        }
    }
}

/// Terminal status of one worker invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum StageStatus {
    /// Worker exited with status zero.
    Success,
    /// Worker failed.
    Failed(ExitReason),
}

impl StageStatus {
    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
