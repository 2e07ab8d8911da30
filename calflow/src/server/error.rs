//! HTTP mapping of [`CalflowError`].

use crate::errors::CalflowError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::debug;

/// Status code a failure is reported with.
#[must_use]
pub fn status_for(err: &CalflowError) -> StatusCode {
    match err {
        CalflowError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
        CalflowError::ArtifactNotFound { .. } => StatusCode::NOT_FOUND,
        CalflowError::RunInProgress { .. } => StatusCode::CONFLICT,
        CalflowError::WorkerExit { .. } | CalflowError::MissingOutput { .. } => {
            StatusCode::BAD_GATEWAY
        }
        CalflowError::WorkerTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        CalflowError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
        CalflowError::WorkerSpawn { .. }
        | CalflowError::Config(_)
        | CalflowError::Internal(_)
        | CalflowError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for CalflowError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        debug!(status = status.as_u16(), error_kind = self.kind(), "request failed");
        (status, format!("{self}\n")).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactKind, ExitKind, ExitReason, StageName};
    use crate::errors::InvalidIdentifierError;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                CalflowError::InvalidIdentifier(InvalidIdentifierError::new(
                    "../x",
                    "contains '..'",
                )),
                StatusCode::BAD_REQUEST,
            ),
            (
                CalflowError::ArtifactNotFound {
                    user: "1".into(),
                    kind: ArtifactKind::CalendarFile,
                },
                StatusCode::NOT_FOUND,
            ),
            (
                CalflowError::RunInProgress { user: "1".into() },
                StatusCode::CONFLICT,
            ),
            (
                CalflowError::WorkerExit {
                    stage: StageName::Timetable,
                    reason: ExitReason::new(ExitKind::Exited(1), ""),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                CalflowError::MissingOutput {
                    stage: StageName::Calendar,
                    file: "1.ics".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                CalflowError::WorkerTimeout {
                    stage: StageName::Calendar,
                    timeout: Duration::from_secs(1),
                    diagnostics: String::new(),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                CalflowError::WorkerSpawn {
                    stage: StageName::SecurityQuestion,
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                CalflowError::Cancelled("client went away".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(status_for(&err), expected, "{err}");
        }
    }

    #[test]
    fn test_failed_stage_and_missing_artifact_are_distinguishable() {
        let failed = CalflowError::WorkerExit {
            stage: StageName::Calendar,
            reason: ExitReason::new(ExitKind::Exited(2), "bad input"),
        }
        .into_response();
        let missing = CalflowError::ArtifactNotFound {
            user: "1".into(),
            kind: ArtifactKind::CalendarFile,
        }
        .into_response();

        assert_ne!(failed.status(), missing.status());
    }
}
