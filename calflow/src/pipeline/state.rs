//! Run state machine.
//!
//! ```text
//! security-question run:  AwaitingSecurityQuestion ──► Done
//! timetable run:          AwaitingTimetable ──► AwaitingCalendarFile ──► Done
//! any non-terminal state ──► Aborted(reason)
//! ```

use crate::core::StageName;
use crate::errors::CalflowError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which request started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Fetch the security question and cache it.
    SecurityQuestion,
    /// Acquire the timetable and generate the calendar file.
    Timetable,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SecurityQuestion => write!(f, "security_question"),
            Self::Timetable => write!(f, "timetable"),
        }
    }
}

/// State of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum RunState {
    /// Waiting on the security-question worker.
    AwaitingSecurityQuestion,
    /// Waiting on the timetable worker.
    AwaitingTimetable,
    /// Waiting on the calendar worker.
    AwaitingCalendarFile,
    /// Finished successfully.
    Done,
    /// Finished with a failure.
    Aborted(String),
}

impl RunState {
    /// The state a run of `kind` starts in.
    #[must_use]
    pub fn initial(kind: RunKind) -> Self {
        match kind {
            RunKind::SecurityQuestion => Self::AwaitingSecurityQuestion,
            RunKind::Timetable => Self::AwaitingTimetable,
        }
    }

    /// The stage this state is waiting on, if any.
    #[must_use]
    pub fn stage(&self) -> Option<StageName> {
        match self {
            Self::AwaitingSecurityQuestion => Some(StageName::SecurityQuestion),
            Self::AwaitingTimetable => Some(StageName::Timetable),
            Self::AwaitingCalendarFile => Some(StageName::Calendar),
            Self::Done | Self::Aborted(_) => None,
        }
    }

    /// Returns true for `Done` and `Aborted`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted(_))
    }

    /// The state after the awaited stage succeeded.
    pub fn next(&self) -> Result<Self, CalflowError> {
        match self {
            Self::AwaitingSecurityQuestion | Self::AwaitingCalendarFile => Ok(Self::Done),
            Self::AwaitingTimetable => Ok(Self::AwaitingCalendarFile),
            Self::Done | Self::Aborted(_) => Err(CalflowError::Internal(format!(
                "cannot advance a run in terminal state {self}"
            ))),
        }
    }

    /// The state after a failure.
    pub fn abort(&self, reason: impl Into<String>) -> Result<Self, CalflowError> {
        if self.is_terminal() {
            return Err(CalflowError::Internal(format!(
                "cannot abort a run in terminal state {self}"
            )));
        }
        Ok(Self::Aborted(reason.into()))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingSecurityQuestion => write!(f, "awaiting_security_question"),
            Self::AwaitingTimetable => write!(f, "awaiting_timetable"),
            Self::AwaitingCalendarFile => write!(f, "awaiting_calendar_file"),
            Self::Done => write!(f, "done"),
            Self::Aborted(reason) => write!(f, "aborted ({reason})"),
        }
    }
}
