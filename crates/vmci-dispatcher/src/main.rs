//! vmci Dispatcher Server

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vmci_core::Configuration;
use vmci_dispatcher::{create_router, AppState, DispatcherConfig};

/// vmci dispatcher server
#[derive(Parser, Debug)]
#[command(name = "vmci-dispatcher")]
#[command(about = "Hands pending build tasks to vmci workers")]
#[command(version)]
struct Args {
    /// Configuration file (defaults to ~/.vmci.yml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP bind address, overrides `dispatcher.bind`
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(true)
        .init();

    let args = Args::parse();

    let configuration = Configuration::load_or_default(args.config.as_deref())?;
    let mut config = DispatcherConfig::from_configuration(&configuration)?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    let addr: SocketAddr = config.bind.parse()?;

    let state = AppState::new(config);
    let router = create_router(state);

    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Dispatcher listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Dispatcher stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
