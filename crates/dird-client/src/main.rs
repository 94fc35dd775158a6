//! directord client daemon
//!
//! Connects out to the server, executes dispatched jobs, and returns
//! results.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dird_client::Client;
use dird_core::config::{self, Config};

#[derive(Parser)]
#[command(name = "dird-client")]
#[command(about = "directord client daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address to connect to (overrides config)
    #[arg(long)]
    server_address: Option<String>,

    /// Identity override (defaults to the host name)
    #[arg(long)]
    identity: Option<String>,

    /// Client cache directory (overrides config)
    #[arg(long)]
    cache_path: Option<PathBuf>,

    /// Default cache TTL in seconds (overrides config)
    #[arg(long)]
    cache_ttl: Option<u64>,

    /// Seconds between heartbeats (overrides config)
    #[arg(long)]
    heartbeat_interval: Option<u64>,

    /// Extra directory for user-defined components (overrides config)
    #[arg(long)]
    component_path: Option<PathBuf>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => config::load_config(path)
                .with_context(|| format!("Failed to load config from {:?}", path))?,
            None => {
                let default_path = config::default_config_path();
                if default_path.exists() {
                    config::load_config(&default_path).unwrap_or_else(|e| {
                        tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                        Config::default()
                    })
                } else {
                    Config::default()
                }
            }
        };

        if let Some(server_address) = self.server_address {
            config.server_address = server_address;
        }
        if let Some(identity) = self.identity {
            config.identity = Some(identity);
        }
        if let Some(cache_path) = self.cache_path {
            config.cache_path = cache_path;
        }
        if let Some(cache_ttl) = self.cache_ttl {
            config.cache_ttl = cache_ttl;
        }
        if let Some(heartbeat_interval) = self.heartbeat_interval {
            config.heartbeat_interval = heartbeat_interval;
        }
        if let Some(component_path) = self.component_path {
            config.component_path = Some(component_path);
        }
        if self.debug {
            config.debug = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("directord client starting...");

    let config = args.into_config()?;
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    let client = Client::new(config, cancel.clone()).context("Client startup failed")?;
    client.start().await.context("Client startup failed")?;
    client.wait().await;

    Ok(())
}
