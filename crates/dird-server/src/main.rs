//! directord server daemon
//!
//! Accepts client connections over the configured transport, coordinates
//! job dispatch and result tracking, and serves the local control socket.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dird_core::config::{self, Config};
use dird_server::Server;

#[derive(Parser)]
#[command(name = "dird-server")]
#[command(about = "directord server daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server listen address (overrides config)
    #[arg(long)]
    bind_address: Option<String>,

    /// UNIX socket path for local RPC (overrides config)
    #[arg(long)]
    socket_path: Option<PathBuf>,

    /// Group owning the control socket (overrides config)
    #[arg(long)]
    socket_group: Option<String>,

    /// Datastore URL (overrides config)
    #[arg(long)]
    datastore: Option<String>,

    /// Seconds between heartbeats (overrides config)
    #[arg(long)]
    heartbeat_interval: Option<u64>,

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
                    tracing::info!("Using default configuration");
                    Config::default()
                }
            }
        };

        if let Some(bind_address) = self.bind_address {
            config.bind_address = bind_address;
        }
        if let Some(socket_path) = self.socket_path {
            config.socket_path = socket_path;
        }
        if let Some(socket_group) = self.socket_group {
            config.socket_group = Some(socket_group);
        }
        if let Some(datastore) = self.datastore {
            config.datastore = datastore;
        }
        if let Some(heartbeat_interval) = self.heartbeat_interval {
            config.heartbeat_interval = heartbeat_interval;
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

    tracing::info!("directord server starting...");

    let config = args.into_config()?;
    let cancel = CancellationToken::new();

    // Setup signal handlers
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

    let mut server = Server::new(config, cancel.clone())
        .await
        .context("Server startup failed")?;
    server.start().await.context("Server startup failed")?;
    server.wait().await;

    Ok(())
}
