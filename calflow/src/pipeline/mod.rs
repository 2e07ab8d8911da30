//! Pipeline orchestration.
//!
//! This module provides:
//! - The run state machine and the per-run session
//! - Per-user run serialization
//! - The orchestrator that sequences stages and promotes their outputs

mod guard;
mod orchestrator;
mod session;
mod state;


pub use guard::{Admission, OverlapPolicy, RunPermit, UserRunGuard};
pub use orchestrator::{
    Orchestrator, PipelineSettings, PipelineStages, RunEvent, RunHandle,
};
pub use session::{PipelineSession, RunSummary, StageOutcome};
pub use state::{RunKind, RunState};
