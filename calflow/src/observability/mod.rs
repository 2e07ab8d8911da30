//! Observability utilities.

mod timer;

pub use timer::SpanTimer;

use crate::errors::CalflowError;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Fails if a subscriber
/// is already installed or the filter does not parse.
pub fn init_tracing(format: LogFormat, default_filter: &str) -> Result<(), CalflowError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter).map_err(|e| {
            CalflowError::Config(format!("invalid log filter '{default_filter}': {e}"))
        })?,
    };

    let installed = match format {
        LogFormat::Text => fmt().with_env_filter(filter).with_target(false).try_init(),
        LogFormat::Json => fmt().json().with_env_filter(filter).try_init(),
    };
    installed
        .map_err(|e| CalflowError::Config(format!("failed to install tracing subscriber: {e}")))
}
