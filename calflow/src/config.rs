//! Service configuration.
//!
//! Loaded from a TOML file; every section and field is optional. CLI flags
//! override file values, which override defaults.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0"
//! port = 8080
//!
//! [store]
//! root = "./data"
//!
//! [workers]
//! script_dir = "./scripts"
//! timeout_secs = 300
//!
//! [workers.timetable]
//! program = "node"
//! args = ["scrape_timetable.js"]
//!
//! [pipeline]
//! overlap_policy = "wait"
//! ```

use crate::errors::CalflowError;
use crate::observability::LogFormat;
use crate::pipeline::{OverlapPolicy, PipelineSettings, PipelineStages};
use crate::runner::WorkerCommand;
use crate::server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalflowConfig {
    /// `[server]` section.
    #[serde(default)]
    pub server: ServerConfig,
    /// `[store]` section.
    #[serde(default)]
    pub store: StoreConfig,
    /// `[workers]` section.
    #[serde(default)]
    pub workers: WorkersConfig,
    /// `[pipeline]` section.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// `[logging]` section.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Artifact store root.
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
    /// Age after which artifacts are reported as stale at startup.
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
            stale_after_days: default_stale_after_days(),
        }
    }
}

fn default_store_root() -> PathBuf {
    PathBuf::from("./data")
}
fn default_stale_after_days() -> u64 {
    30
}

/// `[workers]` section.
///
/// A worker without an explicit command runs `sh {script_dir}/{stage}.sh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Working directory of every worker; passed to the calendar worker.
    #[serde(default = "default_script_dir")]
    pub script_dir: PathBuf,
    /// Per-stage time budget in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Security-question worker.
    #[serde(default)]
    pub security_question: Option<WorkerCommand>,
    /// Timetable worker.
    #[serde(default)]
    pub timetable: Option<WorkerCommand>,
    /// Calendar worker.
    #[serde(default)]
    pub calendar: Option<WorkerCommand>,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            script_dir: default_script_dir(),
            timeout_secs: default_timeout_secs(),
            security_question: None,
            timetable: None,
            calendar: None,
        }
    }
}

fn default_script_dir() -> PathBuf {
    PathBuf::from("./scripts")
}
fn default_timeout_secs() -> u64 {
    300
}

impl WorkersConfig {
    /// `script_dir` resolved against the current directory.
    ///
    /// Workers run inside this directory, so a relative path would no
    /// longer point at it once a worker started.
    #[must_use]
    pub fn resolved_script_dir(&self) -> PathBuf {
        std::path::absolute(&self.script_dir).unwrap_or_else(|_| self.script_dir.clone())
    }

    fn command(&self, configured: Option<&WorkerCommand>, script: &str) -> WorkerCommand {
        configured.cloned().unwrap_or_else(|| {
            WorkerCommand::script("sh", self.resolved_script_dir().join(script))
        })
    }

    /// Builds the three stages from the configured commands.
    #[must_use]
    pub fn stages(&self) -> PipelineStages {
        PipelineStages::new(
            self.command(self.security_question.as_ref(), "security_question.sh"),
            self.command(self.timetable.as_ref(), "timetable.sh"),
            self.command(self.calendar.as_ref(), "calendar.sh"),
        )
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Overlapping same-user runs: `wait` or `reject`.
    #[serde(default)]
    pub overlap_policy: OverlapPolicy,
    /// Keep scratch directories of failed runs.
    #[serde(default = "default_true")]
    pub keep_failed_scratch: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            overlap_policy: OverlapPolicy::default(),
            keep_failed_scratch: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".into()
}

impl CalflowConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, CalflowError> {
        toml::from_str(raw).map_err(|e| CalflowError::Config(e.to_string()))
    }

    /// Loads a TOML file.
    pub fn load(path: &Path) -> Result<Self, CalflowError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CalflowError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Overrides the listen port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.server.port = port;
        self
    }

    /// Overrides the store root.
    #[must_use]
    pub fn with_store_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.store.root = root.into();
        self
    }

    /// Overrides the log format.
    #[must_use]
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.logging.format = format;
        self
    }

    /// Per-stage time budget.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.workers.timeout_secs)
    }

    /// Orchestrator settings derived from this configuration.
    #[must_use]
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            script_dir: self.workers.resolved_script_dir(),
            stage_timeout: self.stage_timeout(),
            overlap_policy: self.pipeline.overlap_policy,
            keep_failed_scratch: self.pipeline.keep_failed_scratch,
        }
    }

    /// Threshold for the startup stale-artifact report.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.store.stale_after_days.saturating_mul(24 * 60 * 60))
    }
}
