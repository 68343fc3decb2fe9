// tablecastd: standalone broker entry point.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use tablecast_broker::config::BrokerConfig;
use tablecast_broker::runtime::Broker;

#[derive(Debug, Parser)]
#[command(
    name = "tablecastd",
    about = "Live query-subscription broker for embedded SQLite databases"
)]
struct Args {
    /// Config file path (defaults to ~/.tablecast/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Bind address override.
    #[arg(long)]
    bind: Option<String>,
    /// Volume root override.
    #[arg(long)]
    root: Option<PathBuf>,
    /// Debounce window override, in milliseconds.
    #[arg(long)]
    debounce_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => BrokerConfig::load_from(path)?,
        None => BrokerConfig::load(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(root) = args.root {
        config.volume_root = root;
    }
    if let Some(debounce_ms) = args.debounce_ms {
        config.debounce_ms = debounce_ms;
    }

    info!(
        bind = %config.bind_addr,
        root = %config.volume_root.display(),
        "starting tablecast broker"
    );

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind `{}`", config.bind_addr))?;
    Broker::new(&config).serve(listener).await
}
