//! End-to-end orchestrator runs against real `sh` worker processes.

#![cfg(unix)]

mod common;

use calflow::core::{ArtifactKind, StageName, UserIdentifier};
use calflow::errors::CalflowError;
use calflow::pipeline::{RunEvent, RunState};
use calflow::stages::PortalCredentials;
use calflow::store::ArtifactStore;
use common::{Workspace, CALENDAR, CALENDAR_FAILS_LATE, PASSWORD};
use pretty_assertions::assert_eq;

fn user() -> UserIdentifier {
    UserIdentifier::parse("12345").unwrap()
}

fn credentials(password: &str) -> PortalCredentials {
    PortalCredentials::new(password, "blue", "sess-1")
}

#[tokio::test]
async fn full_pipeline_produces_every_artifact() {
    let ws = Workspace::new(CALENDAR);
    let orchestrator = ws.orchestrator().await;

    let question = orchestrator.security_question(&user()).await.unwrap();
    assert_eq!(question, "What is your favourite colour?");

    let summary = orchestrator
        .run_timetable(&user(), &credentials(PASSWORD))
        .await
        .unwrap();
    assert_eq!(summary.state, RunState::Done);

    let root = ws.store_root();
    assert_eq!(
        common::read(&root.join("cookies/12345.txt")),
        "What is your favourite colour?"
    );
    assert!(common::read(&root.join("timetables/12345.json")).contains("\"user\":\"12345\""));
    assert!(common::read(&root.join("timetables/12345.ics")).starts_with("BEGIN:VCALENDAR"));
    assert!(root.join("html/12345.html").is_file());

    // Scratch space is gone after a successful run.
    assert!(!root.join("tmp/12345").exists());
}

#[tokio::test]
async fn rerun_overwrites_without_leftovers() {
    let ws = Workspace::new(CALENDAR);
    let orchestrator = ws.orchestrator().await;

    for _ in 0..2 {
        orchestrator
            .run_timetable(&user(), &credentials(PASSWORD))
            .await
            .unwrap();
    }

    let timetables: Vec<_> = std::fs::read_dir(ws.store_root().join("timetables"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    let mut timetables = timetables;
    timetables.sort();
    assert_eq!(timetables, vec!["12345.ics", "12345.json"]);
}

#[tokio::test]
async fn timetable_failure_stops_before_calendar() {
    let ws = Workspace::new(CALENDAR);
    let orchestrator = ws.orchestrator().await;

    let err = orchestrator
        .run_timetable(&user(), &credentials("wrong"))
        .await
        .unwrap_err();

    match err {
        CalflowError::WorkerExit { stage, reason } => {
            assert_eq!(stage, StageName::Timetable);
            assert!(reason.diagnostics.contains("login rejected for 12345"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let store = ArtifactStore::new(ws.store_root());
    assert!(!store.exists(&user(), ArtifactKind::CalendarFile).await);
    assert!(!store.exists(&user(), ArtifactKind::Timetable).await);
}

#[tokio::test]
async fn streaming_run_echoes_calendar_lines_only() {
    let ws = Workspace::new(CALENDAR);
    let orchestrator = ws.orchestrator().await;

    let mut handle = orchestrator.start_timetable_run(user(), credentials(PASSWORD));
    let mut lines = Vec::new();
    let mut outcome = None;
    while let Some(event) = handle.next().await {
        match event {
            RunEvent::Line(line) => lines.push(line),
            RunEvent::Finished(result) => outcome = Some(result),
        }
    }

    assert_eq!(lines, vec!["Parsing timetable", "Calendar ready"]);
    assert!(outcome.unwrap().is_ok());
}

#[tokio::test]
async fn late_calendar_failure_keeps_earlier_artifacts() {
    let ws = Workspace::new(CALENDAR_FAILS_LATE);
    let orchestrator = ws.orchestrator().await;

    let err = orchestrator
        .run_timetable(&user(), &credentials(PASSWORD))
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Some(StageName::Calendar));

    let store = ArtifactStore::new(ws.store_root());
    // Earlier stages are not rolled back; the failed stage promotes nothing.
    assert!(store.exists(&user(), ArtifactKind::Timetable).await);
    assert!(!store.exists(&user(), ArtifactKind::CalendarFile).await);
    // The failed run's scratch directory is kept for diagnosis.
    assert!(ws.store_root().join("tmp/12345").is_dir());
}

#[tokio::test]
async fn concurrent_runs_leave_a_parseable_calendar() {
    let ws = Workspace::new(CALENDAR);
    let orchestrator = ws.orchestrator().await;

    let (user_a, creds_a) = (user(), credentials(PASSWORD));
    let (user_b, creds_b) = (user(), credentials(PASSWORD));
    let (a, b) = tokio::join!(
        orchestrator.run_timetable(&user_a, &creds_a),
        orchestrator.run_timetable(&user_b, &creds_b),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());

    let ics = common::read(&ws.store_root().join("timetables/12345.ics"));
    assert_eq!(ics, "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nEND:VCALENDAR\r\n");
}

#[tokio::test]
async fn traversal_identifier_is_rejected_before_any_io() {
    let err = UserIdentifier::parse("../etc").unwrap_err();
    assert!(err.to_string().contains("invalid user identifier"));

    let err: CalflowError = err.into();
    assert_eq!(err.kind(), "InvalidIdentifier");
}
