//! Heartbeat emitter
//!
//! Reports liveness, uptimes, and the advertised component set every
//! interval, with ±10% jitter so a fleet restarted together does not
//! stampede the server. Heartbeats are lossy by contract; send failures are
//! logged and the loop keeps going.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dird_core::types::Identity;
use dird_core::wire::HeartbeatData;
use dird_driver::contract::ClientDriver;
use dird_protocol::{Channel, Control, Frame, FramePayload};

/// Client software version reported in heartbeats
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Periodic heartbeat task
pub struct HeartbeatEmitter {
    driver: Arc<dyn ClientDriver>,
    identity: Identity,
    machine_id: String,
    components: Vec<String>,
    interval: Duration,
    started: Instant,
    cancel: CancellationToken,
}

impl HeartbeatEmitter {
    /// Create an emitter
    pub fn new(
        driver: Arc<dyn ClientDriver>,
        identity: Identity,
        machine_id: String,
        components: Vec<String>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            driver,
            identity,
            machine_id,
            components,
            interval,
            started: Instant::now(),
            cancel,
        }
    }

    /// Emit heartbeats until cancelled
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            // First beat goes out immediately so the server registers the
            // worker's metadata without waiting a full interval.
            self.beat().await;
            loop {
                let sleep_for = jittered(self.interval);
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        tracing::debug!("Heartbeat emitter shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(sleep_for) => {
                        self.beat().await;
                    }
                }
            }
        })
    }

    async fn beat(&self) {
        let data = HeartbeatData {
            version: VERSION.to_string(),
            host_uptime: host_uptime(),
            agent_uptime: format_secs(self.started.elapsed().as_secs()),
            machine_id: self.machine_id.clone(),
            components: self.components.clone(),
        };
        let payload = FramePayload::control(Uuid::new_v4(), Control::HeartbeatNotice)
            .with_identity(self.identity.as_str())
            .with_data(serde_json::to_vec(&data).unwrap_or_default());

        match self
            .driver
            .send(Frame::new(Channel::Heartbeat, payload))
            .await
        {
            Ok(()) => tracing::debug!("Sent heartbeat to server"),
            Err(e) => tracing::warn!("Heartbeat send failed: {}", e),
        }
    }
}

/// ±10% jitter around the configured interval
fn jittered(interval: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..1.1);
    Duration::from_secs_f64(interval.as_secs_f64() * factor)
}

/// Host uptime from /proc/uptime, blank where unavailable
fn host_uptime() -> String {
    std::fs::read_to_string("/proc/uptime")
        .ok()
        .and_then(|content| {
            content
                .split_whitespace()
                .next()
                .and_then(|s| s.parse::<f64>().ok())
        })
        .map(|secs| format_secs(secs as u64))
        .unwrap_or_default()
}

fn format_secs(total: u64) -> String {
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{}:{:02}:{:02}", hours, minutes, seconds)
}

/// Stable machine identifier: /etc/machine-id when present, otherwise a
/// generated id persisted under the cache directory.
pub fn machine_id(cache_path: &std::path::Path) -> String {
    if let Ok(content) = std::fs::read_to_string("/etc/machine-id") {
        let id = content.trim();
        if !id.is_empty() {
            return id.to_string();
        }
    }
    let fallback = cache_path.join("machine-id");
    if let Ok(content) = std::fs::read_to_string(&fallback) {
        let id = content.trim();
        if !id.is_empty() {
            return id.to_string();
        }
    }
    let generated = Uuid::new_v4().simple().to_string();
    let _ = std::fs::create_dir_all(cache_path);
    if let Err(e) = std::fs::write(&fallback, &generated) {
        tracing::warn!("Could not persist machine id: {}", e);
    }
    generated
}
