//! Client wiring
//!
//! Builds the worker's moving parts from configuration: the outbound
//! transport with its reconnect supervisor, the file-backed cache, the
//! component registry, the heartbeat emitter, and the worker loops.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use dird_components::Registry;
use dird_core::cache::CacheStore;
use dird_core::config::{Config, DatastoreSpec};
use dird_core::datastore;
use dird_core::types::Identity;
use dird_driver::contract::ClientDriver;
use dird_driver::TcpClientDriver;

use crate::heartbeat::{machine_id, HeartbeatEmitter};
use crate::transfer::ClientTransfer;
use crate::worker::Worker;

/// The directord client
pub struct Client {
    config: Config,
    identity: Identity,
    driver: Arc<dyn ClientDriver>,
    cancel: CancellationToken,
}

impl Client {
    /// Build a client from configuration
    pub fn new(config: Config, cancel: CancellationToken) -> anyhow::Result<Self> {
        if config.driver != "tcp" {
            anyhow::bail!(
                "unknown driver {:?}; this build ships the `tcp` reference driver",
                config.driver
            );
        }
        let identity = config
            .identity
            .clone()
            .map(Identity::new)
            .unwrap_or_else(Identity::local);
        let driver: Arc<dyn ClientDriver> = Arc::new(TcpClientDriver::new(
            config.server_address.clone(),
            identity.clone(),
        ));
        Ok(Self {
            config,
            identity,
            driver,
            cancel,
        })
    }

    /// This client's identity
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Connect and spawn the worker roles.
    pub async fn start(&self) -> anyhow::Result<()> {
        tracing::info!(
            "directord client [ {} ] connecting to {}",
            self.identity,
            self.config.server_address
        );
        self.driver.connect().await?;

        // Client caches persist under the cache path so job idempotence
        // survives restarts.
        let cache_store = datastore::open(
            &DatastoreSpec::File(self.config.cache_path.clone()),
            "cache",
        )
        .await?;
        let cache = Arc::new(CacheStore::new(cache_store, self.config.cache_ttl));

        let registry = Arc::new(Registry::builtin());
        if let Some(path) = &self.config.component_path {
            // User components register statically in this build; the path is
            // surfaced so operators notice the knob exists.
            tracing::info!("Component path configured at {:?}", path);
        }

        HeartbeatEmitter::new(
            Arc::clone(&self.driver),
            self.identity.clone(),
            machine_id(&self.config.cache_path),
            registry.names(),
            Duration::from_secs(self.config.heartbeat_interval),
            self.cancel.clone(),
        )
        .spawn();

        let transfer = Arc::new(ClientTransfer::new(
            Arc::clone(&self.driver),
            self.identity.to_string(),
        ));

        Arc::new(Worker::new(
            Arc::clone(&self.driver),
            self.identity.clone(),
            registry,
            cache,
            transfer,
            self.cancel.clone(),
        ))
        .spawn();

        tracing::info!("Client worker running");
        Ok(())
    }

    /// Block until cancelled, then close the transport
    pub async fn wait(&self) {
        self.cancel.cancelled().await;
        self.driver.close();
        tracing::info!("Client shutdown complete");
    }
}
