//! Courier CLI - send HTTP requests through the offline retry queue.
//!
//! Requests marked `--cache` that fail for lack of connectivity are stored in
//! a SQLite queue and can be replayed later with `courier queue replay`.

mod commands;
mod pairs;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use courier_core::{
    ConnectivityConfig, ConnectivityOracle, Courier, CourierConfig, ManualConnectivity,
    NetworkClass, ProbeConnectivity, ReqwestTransport, SqliteStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Send HTTP requests with an offline retry queue")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Queue database (defaults to the platform data directory)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Treat the network as unavailable; cacheable requests go straight to the queue
    #[arg(long, global = true)]
    offline: bool,

    /// Network classes reported while online (wifi, cellular, ethernet, vpn, bluetooth)
    #[arg(long = "network", global = true, value_parser = pairs::parse_network_class)]
    networks: Vec<NetworkClass>,

    /// Maximum age of queued requests in hours
    #[arg(long = "ttl-hours", global = true, default_value = "24", value_parser = pairs::parse_ttl_hours)]
    ttl: Duration,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a single request
    Send(commands::SendArgs),
    /// Inspect or replay the offline queue
    #[command(subcommand)]
    Queue(commands::QueueCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG overrides the flag
    let default_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let store_path = match args.store {
        Some(path) => path,
        None => default_store_path(),
    };
    debug!("Queue database: {}", store_path.display());
    let store = SqliteStore::new(&store_path)
        .with_context(|| format!("Failed to open queue at {}", store_path.display()))?;

    let oracle = build_oracle(args.offline, &args.networks).await?;

    let config = CourierConfig::new().with_cache_ttl(args.ttl);
    let courier = Courier::builder()
        .config(config)
        .transport(ReqwestTransport::new()?)
        .connectivity(oracle)
        .store(Arc::new(store))
        .build()?;

    match args.command {
        Command::Send(send) => commands::send(&courier, send).await,
        Command::Queue(queue) => commands::queue(&courier, queue).await,
    }
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("courier")
        .join("queue.sqlite")
}

async fn build_oracle(
    offline: bool,
    networks: &[NetworkClass],
) -> Result<Arc<dyn ConnectivityOracle>> {
    if offline {
        info!("Offline mode, network treated as unavailable");
        return Ok(Arc::new(ManualConnectivity::offline()));
    }

    let mut config = ConnectivityConfig::default();
    if !networks.is_empty() {
        config = config.with_online_classes(networks.iter().copied());
    }
    let probe = ProbeConnectivity::with_config(config)?;
    let state = probe.check_connectivity().await;
    info!("Connectivity: {}", state);
    Ok(Arc::new(probe))
}
