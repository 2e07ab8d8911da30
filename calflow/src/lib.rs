//! # Calflow
//!
//! Turns a student-portal login into a downloadable calendar file by running
//! three external scraping workers in sequence and serving what they produce.
//!
//! - **Stage runner**: spawns one worker process, streams its stdout lines and
//!   reports a terminal result, with a time budget and cancellation
//! - **Orchestrator**: an explicit run state machine over the
//!   security-question, timetable and calendar stages, one run per user at a
//!   time
//! - **Artifact store**: per-user files under a fixed root, written atomically
//! - **Artifact server**: typed, streaming downloads over HTTP
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use calflow::prelude::*;
//!
//! let store = ArtifactStore::open("./data").await?;
//! let orchestrator = Arc::new(Orchestrator::new(
//!     store,
//!     Arc::new(ProcessRunner::new()),
//!     CalflowConfig::default().workers.stages(),
//!     PipelineSettings::default(),
//! ));
//!
//! let user = UserIdentifier::parse("12345")?;
//! let question = orchestrator.security_question(&user).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod runner;
pub mod server;
pub mod stages;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::CalflowConfig;
    pub use crate::core::{
        ArtifactKind, ExitKind, ExitReason, StageName, StageResult, StageStatus, UserIdentifier,
    };
    pub use crate::errors::{CalflowError, InvalidIdentifierError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        Orchestrator, OverlapPolicy, PipelineSettings, PipelineStages, RunEvent, RunHandle,
        RunSummary,
    };
    pub use crate::runner::{ProcessRunner, StageRequest, StageRunner, WorkerCommand};
    pub use crate::server::{AppState, ArtifactServer, ServerConfig};
    pub use crate::stages::{PortalCredentials, Stage};
    pub use crate::store::ArtifactStore;
}
