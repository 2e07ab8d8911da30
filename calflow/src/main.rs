//! Calflow server binary.

use anyhow::{Context, Result};
use calflow::config::CalflowConfig;
use calflow::events::LoggingEventSink;
use calflow::observability::{init_tracing, LogFormat};
use calflow::pipeline::Orchestrator;
use calflow::runner::ProcessRunner;
use calflow::server::{self, AppState};
use calflow::store::ArtifactStore;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs the calendar pipeline HTTP service.
#[derive(Debug, Parser)]
#[command(name = "calflow", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, env = "CALFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on.
    #[arg(long, env = "CALFLOW_PORT")]
    port: Option<u16>,

    /// Artifact store root.
    #[arg(long, env = "CALFLOW_STORE_ROOT")]
    store_root: Option<PathBuf>,

    /// Emit JSON logs.
    #[arg(long, env = "CALFLOW_JSON_LOGS")]
    json_logs: bool,
}

impl Cli {
    fn resolve_config(&self) -> Result<CalflowConfig> {
        let mut config = match &self.config {
            Some(path) => CalflowConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => CalflowConfig::default(),
        };
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(root) = &self.store_root {
            config = config.with_store_root(root.clone());
        }
        if self.json_logs {
            config = config.with_log_format(LogFormat::Json);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;
    init_tracing(config.logging.format, &config.logging.filter)?;

    let store = ArtifactStore::open(&config.store.root)
        .await
        .with_context(|| format!("opening artifact store at {}", config.store.root.display()))?;
    info!(root = %store.root().display(), "artifact store ready");

    match store.stale_artifacts(config.stale_after()).await {
        Ok(stale) if !stale.is_empty() => {
            warn!(
                count = stale.len(),
                older_than_days = config.store.stale_after_days,
                "stale artifacts present; the pipeline never deletes them"
            );
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "could not inventory stale artifacts"),
    }

    let orchestrator = Orchestrator::new(
        store,
        Arc::new(ProcessRunner::new()),
        config.workers.stages(),
        config.pipeline_settings(),
    )
    .with_event_sink(Arc::new(LoggingEventSink::default()));

    let handle = server::start(&config.server, AppState::new(Arc::new(orchestrator)))
        .await
        .with_context(|| format!("binding {}:{}", config.server.bind, config.server.port))?;
    info!(port = handle.port(), "calflow ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;

    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
