//! vmci Worker Daemon

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vmci_client::DispatcherClient;
use vmci_core::Configuration;
use vmci_worker::{build_registry, WorkerConfig, WorkerHandler};

/// vmci worker daemon
#[derive(Parser, Debug)]
#[command(name = "vmci-worker")]
#[command(about = "Runs vmci build tasks in ephemeral virtual machines")]
#[command(version)]
struct Args {
    /// Configuration file (defaults to ~/.vmci.yml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker ID, overrides `worker.id`
    #[arg(long)]
    worker_id: Option<String>,

    /// Dispatcher base URL, overrides `worker.server`
    #[arg(short, long)]
    server: Option<String>,

    /// Instance driver (`vagrant` or `local`), overrides `worker.driver`
    #[arg(short, long)]
    driver: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(true)
        .init();

    let args = Args::parse();

    let mut configuration = Configuration::load_or_default(args.config.as_deref())?;
    if let Some(worker_id) = &args.worker_id {
        configuration.set("worker.id", worker_id);
    }
    let mut config = WorkerConfig::from_configuration(&configuration)?;
    if let Some(server) = args.server {
        config.server = server;
    }
    if let Some(driver) = args.driver {
        config.driver = driver;
    }

    info!(
        worker_id = %config.worker_id,
        server = %config.server,
        driver = %config.driver,
        concurrency = config.concurrency,
        "Starting vmci worker"
    );

    let registry = build_registry(&config)?;
    let client = DispatcherClient::new(&config.server)?;
    let handler = Arc::new(WorkerHandler::new(
        &config,
        client,
        registry,
        tokio::runtime::Handle::current(),
    )?);

    handler.start()?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown requested, waiting for running tasks");

    // Stopping joins the loop threads, which block on this runtime.
    let stopping = handler.clone();
    tokio::task::spawn_blocking(move || stopping.stop()).await??;

    info!(worker_id = %config.worker_id, "Worker stopped");
    Ok(())
}
