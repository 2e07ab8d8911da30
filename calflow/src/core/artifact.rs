//! Artifact kinds and their storage layout.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The type of a stored per-user artifact.
///
/// Each kind lives in a fixed directory under the store root and uses a
/// fixed file extension, so `(UserIdentifier, ArtifactKind)` maps to exactly
/// one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Cached security-question text from the credential exchange.
    SecurityQuestion,
    /// Scraped timetable data.
    Timetable,
    /// Generated calendar file.
    CalendarFile,
    /// Rendered HTML view of the timetable.
    TimetableView,
}

impl ArtifactKind {
    /// All artifact kinds, in pipeline order.
    pub const ALL: [Self; 4] = [
        Self::SecurityQuestion,
        Self::Timetable,
        Self::CalendarFile,
        Self::TimetableView,
    ];

    /// Directory (relative to the store root) holding this kind.
    #[must_use]
    pub fn directory(&self) -> &'static str {
        match self {
            Self::SecurityQuestion => "cookies",
            Self::Timetable | Self::CalendarFile => "timetables",
            Self::TimetableView => "html",
        }
    }

    /// File extension used for this kind, without the leading dot.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::SecurityQuestion => "txt",
            Self::Timetable => "json",
            Self::CalendarFile => "ics",
            Self::TimetableView => "html",
        }
    }

    /// File name for this kind and a given user key.
    #[must_use]
    pub fn file_name(&self, user: &str) -> String {
        format!("{user}.{}", self.extension())
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SecurityQuestion => write!(f, "security_question"),
            Self::Timetable => write!(f, "timetable"),
            Self::CalendarFile => write!(f, "calendar_file"),
            Self::TimetableView => write!(f, "timetable_view"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(ArtifactKind::SecurityQuestion.directory(), "cookies");
        assert_eq!(ArtifactKind::Timetable.directory(), "timetables");
        assert_eq!(ArtifactKind::CalendarFile.directory(), "timetables");
        assert_eq!(ArtifactKind::TimetableView.directory(), "html");
    }

    #[test]
    fn test_file_names_are_distinct_per_user() {
        let names: std::collections::HashSet<_> = ArtifactKind::ALL
            .iter()
            .map(|k| format!("{}/{}", k.directory(), k.file_name("12345")))
            .collect();
        assert_eq!(names.len(), ArtifactKind::ALL.len());
        assert!(names.contains("timetables/12345.ics"));
    }

    #[test]
    fn test_kind_serialize() {
        let json = serde_json::to_string(&ArtifactKind::CalendarFile).unwrap();
        assert_eq!(json, r#""calendar_file""#);
        assert_eq!(ArtifactKind::CalendarFile.to_string(), "calendar_file");
    }
}
