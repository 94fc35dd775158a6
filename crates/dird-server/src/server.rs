//! Server wiring
//!
//! Builds the shared state from configuration and spawns every coordinator
//! role under one cancellation token.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dird_components::Registry;
use dird_core::config::Config;
use dird_core::datastore;
use dird_core::job::JobSpec;
use dird_driver::contract::ServerDriver;
use dird_driver::TcpServerDriver;

use crate::board::JobBoard;
use crate::control::ControlSocket;
use crate::dispatch::Dispatcher;
use crate::heartbeat::{spawn_expiry_sweep, HeartbeatTracker};
use crate::registry::WorkerRegistry;
use crate::returns::ReturnManager;
use crate::transfer::TransferResponder;

/// Depth of the submission queue between the control socket and the
/// dispatcher
const SUBMIT_QUEUE_CAPACITY: usize = 256;

/// Shared coordinator state
pub struct ServerState {
    /// Effective configuration
    pub config: Config,
    /// Worker registry
    pub workers: Arc<WorkerRegistry>,
    /// Job board
    pub board: Arc<JobBoard>,
    /// Transport driver
    pub driver: Arc<dyn ServerDriver>,
    /// Submission queue feeding the dispatcher
    pub submit_tx: mpsc::Sender<JobSpec>,
    /// Component registry, used to validate submitted verbs
    pub components: Registry,
}

/// The directord server
pub struct Server {
    state: Arc<ServerState>,
    tcp: Arc<TcpServerDriver>,
    submit_rx: Option<mpsc::Receiver<JobSpec>>,
    cancel: CancellationToken,
}

impl Server {
    /// Build a server from configuration (opens the datastore, selects the
    /// driver)
    pub async fn new(config: Config, cancel: CancellationToken) -> anyhow::Result<Self> {
        if config.driver != "tcp" {
            anyhow::bail!(
                "unknown driver {:?}; this build ships the `tcp` reference driver",
                config.driver
            );
        }

        let spec = config.datastore_spec()?;
        tracing::info!("Connecting to {} datastore", config.datastore);
        let worker_table = datastore::open(&spec, "workers").await?;
        let job_table = datastore::open(&spec, "jobs").await?;

        let tcp = Arc::new(TcpServerDriver::new(config.bind_address.clone()));
        let driver: Arc<dyn ServerDriver> = Arc::clone(&tcp) as Arc<dyn ServerDriver>;

        let (submit_tx, submit_rx) = mpsc::channel(SUBMIT_QUEUE_CAPACITY);
        let state = Arc::new(ServerState {
            workers: Arc::new(WorkerRegistry::new(worker_table, config.expiry_window_secs())),
            board: Arc::new(JobBoard::new(job_table)),
            driver,
            submit_tx,
            components: Registry::builtin(),
            config,
        });

        Ok(Self {
            state,
            tcp,
            submit_rx: Some(submit_rx),
            cancel,
        })
    }

    /// Shared state handle
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// The transport's bound address, available after `start()`
    pub fn transport_addr(&self) -> Option<std::net::SocketAddr> {
        self.tcp.local_addr()
    }

    /// Bind the transport and spawn every coordinator role.
    ///
    /// Returns once everything is running; cancellation tears it down.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        let submit_rx = self
            .submit_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("server already started"))?;

        self.state.driver.bind().await?;

        HeartbeatTracker::new(
            Arc::clone(&self.state.driver),
            Arc::clone(&self.state.workers),
            self.cancel.clone(),
        )
        .spawn();

        spawn_expiry_sweep(Arc::clone(&self.state.workers), self.cancel.clone());

        Arc::new(Dispatcher::new(
            Arc::clone(&self.state.driver),
            Arc::clone(&self.state.workers),
            Arc::clone(&self.state.board),
            self.cancel.clone(),
        ))
        .spawn(submit_rx);

        ReturnManager::new(
            Arc::clone(&self.state.driver),
            Arc::clone(&self.state.board),
            self.state.submit_tx.clone(),
            self.cancel.clone(),
        )
        .spawn();

        TransferResponder::new(Arc::clone(&self.state.driver), self.cancel.clone()).spawn();

        let control = ControlSocket::new(self.state(), self.cancel.clone());
        tokio::spawn(async move {
            if let Err(e) = control.run().await {
                tracing::error!("Control socket failed: {}", e);
            }
        });

        tracing::info!("Server coordinator running");
        Ok(())
    }

    /// Block until cancelled, then close the transport
    pub async fn wait(&self) {
        self.cancel.cancelled().await;
        self.state.driver.close();
        tracing::info!("Server shutdown complete");
    }
}
