//! Artifact delivery over HTTP.

use crate::core::{ArtifactKind, UserIdentifier};
use crate::errors::CalflowError;
use crate::store::ArtifactStore;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Content type for a file extension. Never inspects file content.
#[must_use]
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "ics" => "text/calendar; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// `attachment` disposition suggesting `{user}.{extension}`.
#[must_use]
pub fn attachment_disposition(user: &UserIdentifier, extension: &str) -> String {
    if extension.is_empty() {
        format!("attachment; filename=\"{user}\"")
    } else {
        format!("attachment; filename=\"{user}.{extension}\"")
    }
}

/// Streams stored artifacts with typed download headers.
#[derive(Debug, Clone)]
pub struct ArtifactServer {
    store: ArtifactStore,
}

impl ArtifactServer {
    /// Creates a server reading from `store`.
    #[must_use]
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    /// Builds a streaming response for the stored artifact.
    ///
    /// Fails with `ArtifactNotFound` when nothing is stored for the key.
    /// The body is read from disk as the client consumes it; a client that
    /// disconnects simply ends the stream.
    pub async fn serve(
        &self,
        user: &UserIdentifier,
        kind: ArtifactKind,
    ) -> Result<Response, CalflowError> {
        let stored = self.store.open_for_read(user, kind).await?;
        let extension = stored
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_string();

        debug!(user = %user, kind = %kind, bytes = stored.len, "serving artifact");

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type_for(&extension))
            .header(header::CONTENT_LENGTH, stored.len)
            .header(
                header::CONTENT_DISPOSITION,
                attachment_disposition(user, &extension),
            )
            .body(Body::from_stream(ReaderStream::new(stored.file)))
            .map_err(|e| CalflowError::Internal(format!("failed to build response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_table() {
        assert_eq!(content_type_for("ics"), "text/calendar; charset=utf-8");
        assert_eq!(content_type_for("HTML"), "text/html; charset=utf-8");
        assert_eq!(content_type_for("json"), "application/json");
        assert_eq!(content_type_for("txt"), "text/plain; charset=utf-8");
        assert_eq!(content_type_for("pdf"), "application/octet-stream");
        assert_eq!(content_type_for(""), "application/octet-stream");
    }

    #[test]
    fn test_disposition() {
        let user = UserIdentifier::parse("12345").unwrap();
        assert_eq!(
            attachment_disposition(&user, "ics"),
            "attachment; filename=\"12345.ics\""
        );
        assert_eq!(attachment_disposition(&user, ""), "attachment; filename=\"12345\"");
    }

    #[tokio::test]
    async fn test_serve_sets_headers() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let user = UserIdentifier::parse("12345").unwrap();
        store
            .write(&user, ArtifactKind::CalendarFile, b"BEGIN:VCALENDAR")
            .await
            .unwrap();

        let response = ArtifactServer::new(store)
            .serve(&user, ArtifactKind::CalendarFile)
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/calendar; charset=utf-8");
        assert_eq!(headers[header::CONTENT_LENGTH], "15");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"12345.ics\""
        );

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"BEGIN:VCALENDAR");
    }

    #[tokio::test]
    async fn test_serve_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let user = UserIdentifier::parse("12345").unwrap();

        let err = ArtifactServer::new(store)
            .serve(&user, ArtifactKind::TimetableView)
            .await
            .unwrap_err();
        assert!(matches!(err, CalflowError::ArtifactNotFound { .. }));
    }
}
