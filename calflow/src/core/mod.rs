//! Core types for calflow.
//!
//! This module provides the fundamental types shared by every layer:
//! - `UserIdentifier` - validated, path-safe user key
//! - `ArtifactKind` - the four stored artifact types
//! - `StageName`, `StageStatus`, `ExitReason` - stage outcome vocabulary
//! - `StageResult` - the terminal result of one worker invocation

mod artifact;
mod identity;
mod result;
mod status;

pub use artifact::ArtifactKind;
pub use identity::UserIdentifier;
pub use result::StageResult;
pub use status::{ExitKind, ExitReason, StageName, StageStatus};
