// THEORY:
// `handguard-runner` wires real collaborators into the library's Supervisor:
// - frames come from image directories, or from OpenCV for everything else;
// - detections are replayed from a JSON-lines recording;
// - alerts are written to a snapshot directory, or only logged.
//
// The runner starts every enabled source, prints the event stream as tracing
// output, and stops all workers on Ctrl-C.

mod capture;
mod replay;
mod snapshot;
mod sources;

use anyhow::{Context, Result};
use clap::Parser;
use handguard::notify::LogNotifier;
use handguard::{
    Collaborators, Detector, InMemoryCatalog, MonitorConfig, Notifier, SourceCatalog, StreamEvent,
    Supervisor,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::capture::RunnerOpener;
use crate::replay::ReplayDetector;
use crate::snapshot::SnapshotNotifier;

/// Watch camera streams for bare hands inside danger zones.
#[derive(Parser)]
#[command(name = "handguard-runner")]
#[command(version)]
struct Cli {
    /// Monitor configuration (TOML). Defaults apply when omitted.
    #[arg(short, long, env = "HANDGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Source catalog (TOML with `[[sources]]` tables)
    #[arg(short, long, env = "HANDGUARD_SOURCES")]
    sources: PathBuf,

    /// Recorded detections to replay (JSON lines)
    #[arg(short, long)]
    detections: Option<PathBuf>,

    /// Write alert snapshots here instead of only logging them
    #[arg(long)]
    snapshots: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // --- 1. Logging ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("handguard=debug,handguard_runner=debug,info")
        } else {
            EnvFilter::new("handguard=info,handguard_runner=info,warn")
        }
    });
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // --- 2. Configuration and catalog ---
    let config = match &cli.config {
        Some(path) => MonitorConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    let sources = sources::load(&cli.sources)?;
    let catalog = Arc::new(InMemoryCatalog::new(sources.iter().cloned()));
    info!(sources = sources.len(), enabled = catalog.enabled().len(), "catalog loaded");

    // --- 3. Collaborators ---
    let detector: Arc<dyn Detector> = match &cli.detections {
        Some(path) => {
            let replay = ReplayDetector::load(path)?;
            info!(frames = replay.len(), "replaying recorded detections");
            Arc::new(replay)
        }
        None => {
            warn!("no detections given; every frame will be clear");
            Arc::new(ReplayDetector::default())
        }
    };
    let notifier: Arc<dyn Notifier> = match &cli.snapshots {
        Some(dir) => Arc::new(
            SnapshotNotifier::new(dir)
                .with_context(|| format!("creating snapshot directory {}", dir.display()))?,
        ),
        None => Arc::new(LogNotifier),
    };
    let collaborators = Collaborators {
        opener: Arc::new(RunnerOpener),
        detector,
        notifier,
        catalog: Some(catalog.clone() as Arc<dyn SourceCatalog>),
    };

    // --- 4. Start ---
    let (supervisor, events) = Supervisor::new(config, collaborators)?;
    let logger = tokio::spawn(log_events(events));

    let report = {
        let supervisor = supervisor.clone();
        let sources = catalog.enabled();
        tokio::task::spawn_blocking(move || supervisor.start_all(&sources)).await?
    };
    info!(
        started = report.started.len(),
        resumed = report.resumed.len(),
        unchanged = report.unchanged.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "sources started"
    );
    for (id, err) in &report.failed {
        error!(source_id = %id, "could not start: {err}");
    }

    // --- 5. Run until interrupted ---
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutting down");
    {
        let supervisor = supervisor.clone();
        tokio::task::spawn_blocking(move || supervisor.stop_all()).await?;
    }
    drop(supervisor);
    logger.abort();
    Ok(())
}

async fn log_events(mut events: mpsc::UnboundedReceiver<StreamEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Log { source_id: Some(id), text } => info!(source_id = %id, "{text}"),
            StreamEvent::Log { source_id: None, text } => info!("{text}"),
            StreamEvent::Alert {
                source_id,
                source_name,
                text,
            } => warn!(source_id = %source_id, source = %source_name, "ALERT: {text}"),
            StreamEvent::Disconnected { source_id, worker } => {
                warn!(source_id = %source_id, worker = %worker, "stream disconnected")
            }
            StreamEvent::Completed(id) => info!(source_id = %id, "source finished"),
            StreamEvent::Added { source_id, name } => {
                info!(source_id = %source_id, name = %name, "source added")
            }
            StreamEvent::Removed(id) => info!(source_id = %id, "source removed"),
        }
    }
}
