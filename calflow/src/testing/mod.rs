//! Testing utilities.
//!
//! - [`ScriptedRunner`]: a [`StageRunner`] that replays canned results
//!   without spawning processes.
//! - [`write_script`]: drops an executable `sh` worker into a directory for
//!   tests that exercise the real [`ProcessRunner`](crate::runner::ProcessRunner).

mod scripted;

pub use scripted::{ScriptedRunner, ScriptedStep};

use std::path::{Path, PathBuf};

/// Writes `body` as a `sh` script named `name` under `dir` and returns its path.
///
/// The script is marked executable on Unix.
pub fn write_script(dir: &Path, name: &str, body: &str) -> std::io::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }

    Ok(path)
}
