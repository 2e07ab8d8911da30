//! Shared fixtures: a temporary store plus `sh` workers that honour the
//! worker argument contract.

#![allow(dead_code)]

use calflow::config::CalflowConfig;
use calflow::pipeline::{Orchestrator, PipelineSettings};
use calflow::runner::ProcessRunner;
use calflow::store::ArtifactStore;
use calflow::testing::write_script;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const PASSWORD: &str = "hunter2";

pub const SECURITY_QUESTION: &str = r#"
echo "What is your favourite colour?"
"#;

pub const TIMETABLE: &str = r#"
if [ "$2" != "hunter2" ]; then
  echo "login rejected for $1" >&2
  exit 3
fi
printf '{"user":"%s","events":[]}' "$1" > "$5/$1.json"
echo "timetable saved"
"#;

pub const CALENDAR: &str = r#"
if [ ! -f "$2/$1.json" ]; then
  echo "no timetable in $2" >&2
  exit 4
fi
echo "Parsing timetable"
printf 'BEGIN:VCALENDAR\r\nVERSION:2.0\r\nEND:VCALENDAR\r\n' > "$2/$1.ics"
echo "<table></table>" > "$2/$1.html"
echo "Calendar ready"
"#;

pub const CALENDAR_FAILS_LATE: &str = r#"
echo "Parsing timetable"
echo "malformed timetable" >&2
exit 1
"#;

pub struct Workspace {
    pub dir: TempDir,
    pub config: CalflowConfig,
}

impl Workspace {
    /// Store root and scripts under a fresh temporary directory, with the
    /// given calendar worker body.
    pub fn new(calendar: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let scripts = dir.path().join("scripts");
        std::fs::create_dir_all(&scripts).unwrap();
        write_script(&scripts, "security_question.sh", SECURITY_QUESTION).unwrap();
        write_script(&scripts, "timetable.sh", TIMETABLE).unwrap();
        write_script(&scripts, "calendar.sh", calendar).unwrap();

        let mut config = CalflowConfig::default()
            .with_port(0)
            .with_store_root(dir.path().join("data"));
        config.server.bind = "127.0.0.1".into();
        config.workers.script_dir = scripts;
        config.workers.timeout_secs = 20;

        Self { dir, config }
    }

    pub fn store_root(&self) -> PathBuf {
        self.config.store.root.clone()
    }

    pub fn settings(&self) -> PipelineSettings {
        self.config.pipeline_settings()
    }

    pub async fn orchestrator(&self) -> Arc<Orchestrator> {
        let store = ArtifactStore::open(self.store_root()).await.unwrap();
        Arc::new(Orchestrator::new(
            store,
            Arc::new(ProcessRunner::new()),
            self.config.workers.stages(),
            self.settings(),
        ))
    }
}

pub fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}
