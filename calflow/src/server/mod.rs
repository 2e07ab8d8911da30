//! HTTP surface: pipeline triggers and artifact downloads.
//!
//! | Route | Response |
//! |---|---|
//! | `GET /pipeline/security-question/{user}` | question text |
//! | `GET /pipeline/timetable/{user}/{pass}/{secret}/{session}` | streamed calendar-stage lines |
//! | `GET /pipeline/calendar/{user}` | `{user}.ics` download |
//! | `GET /pipeline/timetable-view/{user}` | `{user}.html` download |
//! | `GET /health` | `{"status":"healthy","active_runs":n}` |

mod delivery;
mod error;

pub use delivery::{attachment_disposition, content_type_for, ArtifactServer};
pub use error::status_for;

use crate::core::{ArtifactKind, UserIdentifier};
use crate::errors::CalflowError;
use crate::pipeline::{Orchestrator, RunEvent};
use crate::stages::PortalCredentials;
use axum::body::{Body, Bytes};
use axum::extract::{MatchedPath, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span};

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: String,
    /// Port to bind; 0 picks a free one.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Shared state passed to handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Runs the pipeline.
    pub orchestrator: Arc<Orchestrator>,
    /// Serves stored artifacts.
    pub artifacts: ArtifactServer,
    /// When the server started.
    pub started_at: Instant,
}

impl AppState {
    /// Creates state around an orchestrator, serving from its store.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let artifacts = ArtifactServer::new(orchestrator.store().clone());
        Self {
            orchestrator,
            artifacts,
            started_at: Instant::now(),
        }
    }
}

/// Builds the router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/pipeline/security-question/{user}", get(security_question))
        .route(
            "/pipeline/timetable/{user}/{pass}/{secret}/{session}",
            get(timetable),
        )
        .route("/pipeline/calendar/{user}", get(calendar))
        .route("/pipeline/timetable-view/{user}", get(timetable_view))
        .route("/health", get(health))
        .with_state(state)
        // Spans carry the route template only: the timetable path holds credentials.
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
            let route = req
                .extensions()
                .get::<MatchedPath>()
                .map_or("unmatched", MatchedPath::as_str);
            info_span!("http_request", method = %req.method(), route)
        }))
}

/// Handle to a running server.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bound port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stops accepting connections and waits for in-flight requests.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            error!(error = %e, "server task ended abnormally");
        }
    }
}

/// Binds the listener and serves in the background.
pub async fn start(config: &ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let listener = tokio::net::TcpListener::bind((config.bind.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;
    let router = build_router(state);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "server error");
        }
    });

    info!(%addr, "calflow server listening");
    Ok(ServerHandle {
        addr,
        shutdown,
        server,
    })
}

/// GET /pipeline/security-question/{user}
async fn security_question(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<String, CalflowError> {
    let user = UserIdentifier::parse(&user)?;
    state.orchestrator.security_question(&user).await
}

/// GET /pipeline/timetable/{user}/{pass}/{secret}/{session}
///
/// The status is decided once the calendar stage printed its first line or
/// the run ended. Later failures are appended as an `error:` line and the
/// body is aborted.
async fn timetable(
    State(state): State<AppState>,
    Path((user, pass, secret, session)): Path<(String, String, String, String)>,
) -> Result<Response, CalflowError> {
    let user = UserIdentifier::parse(&user)?;
    let credentials = PortalCredentials::new(pass, secret, session);

    let mut handle = state.orchestrator.start_timetable_run(user, credentials);
    let first = match handle.next().await {
        Some(RunEvent::Line(line)) => line,
        Some(RunEvent::Finished(Ok(_))) => return Ok(text_response(Body::empty())),
        Some(RunEvent::Finished(Err(err))) => return Err(err),
        None => {
            return Err(CalflowError::Internal(
                "timetable run ended without reporting an outcome".into(),
            ))
        }
    };

    let events = stream::once(async move { RunEvent::Line(first) }).chain(handle.into_stream());
    let chunks = events.flat_map(|event| stream::iter(event_chunks(event)));
    Ok(text_response(Body::from_stream(chunks)))
}

fn event_chunks(event: RunEvent) -> Vec<Result<Bytes, std::io::Error>> {
    match event {
        RunEvent::Line(mut line) => {
            line.push('\n');
            vec![Ok(Bytes::from(line))]
        }
        RunEvent::Finished(Ok(_)) => Vec::new(),
        RunEvent::Finished(Err(err)) => vec![
            Ok(Bytes::from(format!("error: {err}\n"))),
            Err(std::io::Error::other(err.to_string())),
        ],
    }
}

fn text_response(body: Body) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

/// GET /pipeline/calendar/{user}
async fn calendar(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Response, CalflowError> {
    let user = UserIdentifier::parse(&user)?;
    state.artifacts.serve(&user, ArtifactKind::CalendarFile).await
}

/// GET /pipeline/timetable-view/{user}
async fn timetable_view(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Response, CalflowError> {
    let user = UserIdentifier::parse(&user)?;
    state.artifacts.serve(&user, ArtifactKind::TimetableView).await
}

/// GET /health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "active_runs": state.orchestrator.active_runs(),
    }))
}
