//! Terminal result of one stage invocation.

use super::{ExitReason, StageName, StageStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The outcome of one worker invocation.
///
/// Produced exactly once per spawn; the emitted lines are owned by whoever
/// receives the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage that produced this result.
    pub stage: StageName,
    /// Every line the worker wrote to stdout, in order, without terminators.
    pub lines: Vec<String>,
    /// Terminal status.
    pub status: StageStatus,
    /// Wall-clock time from spawn to exit.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl StageResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(stage: StageName, lines: Vec<String>, duration: Duration) -> Self {
        Self {
            stage,
            lines,
            status: StageStatus::Success,
            duration,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(
        stage: StageName,
        lines: Vec<String>,
        reason: ExitReason,
        duration: Duration,
    ) -> Self {
        Self {
            stage,
            lines,
            status: StageStatus::Failed(reason),
            duration,
        }
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns the duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }

    /// Joins the emitted lines with newlines.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
