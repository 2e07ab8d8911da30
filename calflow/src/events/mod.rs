//! Pipeline lifecycle events.
//!
//! The orchestrator reports every run and stage transition to an
//! [`EventSink`]. Production wiring uses [`LoggingEventSink`]; tests use
//! [`CollectingEventSink`] to assert on the exact sequence.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run was accepted and holds the per-user guard.
pub const RUN_STARTED: &str = "run.started";
/// A run found another run in flight for the same user.
pub const RUN_OVERLAP: &str = "run.overlap";
/// A run reached `Done`.
pub const RUN_COMPLETED: &str = "run.completed";
/// A run reached `Aborted`.
pub const RUN_ABORTED: &str = "run.aborted";
/// A stage's worker was spawned.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage's worker exited successfully and its outputs were promoted.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage failed.
pub const STAGE_FAILED: &str = "stage.failed";
/// An artifact was written to the store.
pub const ARTIFACT_STORED: &str = "artifact.stored";
