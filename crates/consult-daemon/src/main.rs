//! Consult escalation daemon
//!
//! Loads departments and actors from a configuration file, then runs the
//! escalation sweep and notification delivery until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Run continuously
//! consult-daemon --config consult.toml
//!
//! # One sweep against a durable store, then exit
//! consult-daemon --config consult.toml --state-path ./.consult-state --once
//!
//! # Sweep every 15 seconds, debug logging for the engine
//! RUST_LOG=consult_coordination=debug consult-daemon --config consult.toml --sweep-interval-secs 15
//! ```

mod sink;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use consult_coordination::{
    ConfigFile, ConsultRegistry, DepartmentCatalog, EscalationScheduler, MemoryStore,
    NotificationDispatcher, SharedConsultStore, StaticDirectory, SystemClock,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sink::LogSink;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML, or YAML with a .yaml/.yml extension)
    #[arg(long, default_value = "consult.toml")]
    config: PathBuf,

    /// Seconds between escalation sweeps (overrides the file and CONSULT_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    sweep_interval_secs: Option<u64>,

    /// Run a single sweep and exit
    #[arg(long, default_value_t = false)]
    once: bool,

    /// RocksDB state directory; without it consults live in memory
    #[arg(long)]
    state_path: Option<PathBuf>,
}

#[cfg(feature = "rocksdb-store")]
fn open_store(state_path: Option<PathBuf>) -> Result<SharedConsultStore> {
    match state_path {
        Some(path) => {
            info!("Consult state path: {}", path.display());
            let store = consult_coordination::RocksStore::open(&path)
                .map_err(|e| anyhow::anyhow!("Failed to open state store: {}", e))?;
            Ok(store.shared())
        }
        None => Ok(MemoryStore::new().shared()),
    }
}

#[cfg(not(feature = "rocksdb-store"))]
fn open_store(state_path: Option<PathBuf>) -> Result<SharedConsultStore> {
    if let Some(path) = state_path {
        warn!(
            "Built without rocksdb-store; ignoring --state-path {} and keeping consults in memory",
            path.display()
        );
    }
    Ok(MemoryStore::new().shared())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = ConfigFile::load(&args.config)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(secs) = args.sweep_interval_secs {
        config.engine.sweep_interval_secs = secs;
    }
    info!(
        config = %args.config.display(),
        departments = config.departments.len(),
        actors = config.actors.len(),
        sweep_interval_secs = config.engine.sweep_interval_secs,
        "Consult daemon starting"
    );

    let catalog = DepartmentCatalog::from_file(&args.config)
        .map_err(|e| anyhow::anyhow!("Failed to load departments: {}", e))?
        .shared();
    let directory = Arc::new(StaticDirectory::new(config.actors));
    let store = open_store(args.state_path)?;

    let sink = LogSink::shared();
    let (dispatcher, worker) = NotificationDispatcher::with_sink(sink.clone(), config.delivery);
    let registry = ConsultRegistry::new(
        store,
        catalog,
        directory,
        dispatcher.shared(),
        SystemClock::shared(),
    )
    .shared();
    let scheduler = EscalationScheduler::new(registry.clone(), config.engine).shared();

    let cancel = CancellationToken::new();
    let delivery = tokio::spawn(worker.run(cancel.clone()));

    if args.once {
        let outcome = scheduler.sweep().await;
        cancel.cancel();
        delivery.await?;
        let report = outcome.map_err(|e| anyhow::anyhow!("Sweep failed: {}", e))?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let sweeps = tokio::spawn(scheduler.run(cancel.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    cancel.cancel();

    sweeps.await?;
    delivery.await?;

    let stats = registry.dispatcher().stats();
    info!(
        enqueued = stats.enqueued,
        delivered = stats.delivered,
        dropped = stats.dropped,
        failed = stats.failed,
        sink_delivered = sink.delivered(),
        "Consult daemon stopped"
    );
    Ok(())
}
