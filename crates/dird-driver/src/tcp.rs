//! Reference TCP transport
//!
//! Frames travel over one TCP connection per client, multiplexing all four
//! logical channels. The first frame a client sends is a heartbeat carrying
//! its identity; the server registers the connection under that identity.
//! The client side keeps a supervisor task that reconnects with exponential
//! backoff and resends the frame that was in flight when a connection died.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dird_core::types::Identity;
use dird_protocol::{Channel, Control, Frame, FrameCodec, FramePayload};

use crate::contract::{ClientDriver, Delivery, ServerDriver};
use crate::error::DriverError;
use crate::ExponentialBackoff;

/// Per-connection outbound queue depth
const CONNECTION_QUEUE_CAPACITY: usize = 256;

/// Per-channel inbound queue depth
const CHANNEL_QUEUE_CAPACITY: usize = 1024;

/// How long the server waits for the identifying first frame
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type InboundReceivers<T> = HashMap<Channel, Mutex<mpsc::Receiver<T>>>;

fn channel_queues<T>() -> (HashMap<Channel, mpsc::Sender<T>>, InboundReceivers<T>) {
    let mut senders = HashMap::new();
    let mut receivers = HashMap::new();
    for channel in Channel::all() {
        let (tx, rx) = mpsc::channel(CHANNEL_QUEUE_CAPACITY);
        senders.insert(channel, tx);
        receivers.insert(channel, Mutex::new(rx));
    }
    (senders, receivers)
}

/// A registered client connection
struct ConnectionHandle {
    /// Monotonic id used to detect stale pool entries
    conn_id: u64,
    /// Outbound queue for this connection
    tx: mpsc::Sender<Frame>,
    /// Cancels this connection only
    cancel: CancellationToken,
}

/// Server side of the TCP transport
pub struct TcpServerDriver {
    bind_address: String,
    local_addr: OnceLock<std::net::SocketAddr>,
    pool: Arc<DashMap<Identity, ConnectionHandle>>,
    inbound_tx: HashMap<Channel, mpsc::Sender<Delivery>>,
    inbound_rx: InboundReceivers<Delivery>,
    next_conn_id: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl TcpServerDriver {
    /// Create a server driver for the given bind address
    pub fn new(bind_address: impl Into<String>) -> Self {
        let (inbound_tx, inbound_rx) = channel_queues();
        Self {
            bind_address: bind_address.into(),
            local_addr: OnceLock::new(),
            pool: Arc::new(DashMap::new()),
            inbound_tx,
            inbound_rx,
            next_conn_id: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
        }
    }

    /// The bound address, available after `bind()` (useful with port 0)
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.local_addr.get().copied()
    }

    async fn handle_connection(
        stream: TcpStream,
        peer: std::net::SocketAddr,
        pool: Arc<DashMap<Identity, ConnectionHandle>>,
        inbound_tx: HashMap<Channel, mpsc::Sender<Delivery>>,
        conn_id: u64,
        cancel: CancellationToken,
    ) {
        let mut framed = Framed::new(stream, FrameCodec::new());

        // The first frame identifies the client
        let first = tokio::select! {
            _ = cancel.cancelled() => return,
            result = tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next()) => match result {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(e))) => {
                    tracing::warn!("Handshake decode error from {}: {}", peer, e);
                    return;
                }
                Ok(None) => return,
                Err(_) => {
                    tracing::warn!("Handshake timeout from {}", peer);
                    return;
                }
            },
        };

        if first.payload.identity.is_empty() {
            tracing::warn!("Connection from {} sent no identity, dropping", peer);
            return;
        }
        let identity = Identity::new(first.payload.identity.clone());

        let (tx, mut outgoing_rx) = mpsc::channel::<Frame>(CONNECTION_QUEUE_CAPACITY);
        if let Some(previous) = pool.insert(
            identity.clone(),
            ConnectionHandle {
                conn_id,
                tx,
                cancel: cancel.clone(),
            },
        ) {
            tracing::info!("Replacing connection for {}", identity);
            previous.cancel.cancel();
        }
        tracing::info!("Client {} connected from {}", identity, peer);

        // Route the identifying frame like any other
        if let Some(route) = inbound_tx.get(&first.channel) {
            let _ = route
                .send(Delivery {
                    identity: identity.clone(),
                    frame: first,
                })
                .await;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                outgoing = outgoing_rx.recv() => {
                    let Some(frame) = outgoing else { break };
                    if let Err(e) = framed.send(frame).await {
                        tracing::warn!("Send to {} failed: {}", identity, e);
                        break;
                    }
                }

                incoming = framed.next() => {
                    match incoming {
                        Some(Ok(frame)) => {
                            if let Some(route) = inbound_tx.get(&frame.channel) {
                                let delivery = Delivery {
                                    identity: identity.clone(),
                                    frame,
                                };
                                if route.send(delivery).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!("Decode error from {}: {}", identity, e);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        // Only remove the pool entry if it still belongs to this connection
        pool.remove_if(&identity, |_, handle| handle.conn_id == conn_id);
        tracing::info!("Client {} disconnected", identity);
    }
}

#[async_trait]
impl ServerDriver for TcpServerDriver {
    async fn bind(&self) -> Result<(), DriverError> {
        let listener =
            TcpListener::bind(&self.bind_address)
                .await
                .map_err(|source| DriverError::Bind {
                    address: self.bind_address.clone(),
                    source,
                })?;
        let local = listener.local_addr()?;
        let _ = self.local_addr.set(local);
        tracing::info!("Transport listening on {}", local);

        let pool = Arc::clone(&self.pool);
        let inbound_tx = self.inbound_tx.clone();
        let next_conn_id = Arc::clone(&self.next_conn_id);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Transport accept loop shutting down");
                        break;
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                let conn_id = next_conn_id.fetch_add(1, Ordering::SeqCst);
                                let connection_cancel = cancel.child_token();
                                tokio::spawn(Self::handle_connection(
                                    stream,
                                    peer,
                                    Arc::clone(&pool),
                                    inbound_tx.clone(),
                                    conn_id,
                                    connection_cancel,
                                ));
                            }
                            Err(e) => {
                                tracing::error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn send(&self, identity: &Identity, frame: Frame) -> Result<(), DriverError> {
        if self.cancel.is_cancelled() {
            return Err(DriverError::Closed);
        }
        let tx = self
            .pool
            .get(identity)
            .map(|handle| handle.tx.clone())
            .ok_or_else(|| DriverError::NotConnected(identity.to_string()))?;
        tx.send(frame)
            .await
            .map_err(|_| DriverError::NotConnected(identity.to_string()))
    }

    async fn recv(&self, channel: Channel) -> Option<Delivery> {
        let mut rx = self.inbound_rx.get(&channel)?.lock().await;
        rx.recv().await
    }

    fn connected(&self) -> Vec<Identity> {
        self.pool.iter().map(|entry| entry.key().clone()).collect()
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

/// Client side of the TCP transport
pub struct TcpClientDriver {
    server_address: String,
    identity: Identity,
    outgoing_tx: mpsc::Sender<Frame>,
    outgoing_rx: Mutex<Option<mpsc::Receiver<Frame>>>,
    inbound_tx: HashMap<Channel, mpsc::Sender<Frame>>,
    inbound_rx: InboundReceivers<Frame>,
    connected: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl TcpClientDriver {
    /// Create a client driver addressed at the server
    pub fn new(server_address: impl Into<String>, identity: Identity) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(CONNECTION_QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = channel_queues();
        let (connected, _) = watch::channel(false);
        Self {
            server_address: server_address.into(),
            identity,
            outgoing_tx,
            outgoing_rx: Mutex::new(Some(outgoing_rx)),
            inbound_tx,
            inbound_rx,
            connected,
            cancel: CancellationToken::new(),
        }
    }

    /// Whether the supervisor currently holds a live connection
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn handshake_frame(identity: &Identity) -> Frame {
        Frame::new(
            Channel::Heartbeat,
            FramePayload::control(Uuid::new_v4(), Control::HeartbeatNotice)
                .with_identity(identity.as_str()),
        )
    }

    async fn supervise(
        address: String,
        identity: Identity,
        mut outgoing_rx: mpsc::Receiver<Frame>,
        inbound_tx: HashMap<Channel, mpsc::Sender<Frame>>,
        connected: watch::Sender<bool>,
        cancel: CancellationToken,
    ) {
        let mut backoff = ExponentialBackoff::reconnect();
        // A frame that was in flight when the connection died, resent first
        let mut pending: Option<Frame> = None;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let stream = tokio::select! {
                _ = cancel.cancelled() => break,
                result = TcpStream::connect(&address) => match result {
                    Ok(stream) => stream,
                    Err(e) => {
                        let delay = backoff.next_delay();
                        tracing::warn!(
                            "Connection to {} failed: {}. Retrying in {:?}",
                            address,
                            e,
                            delay
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => continue,
                        }
                    }
                },
            };

            let mut framed = Framed::new(stream, FrameCodec::new());
            if let Err(e) = framed.send(Self::handshake_frame(&identity)).await {
                tracing::warn!("Handshake to {} failed: {}", address, e);
                continue;
            }
            tracing::info!("Connected to server at {}", address);
            backoff.reset(Duration::from_secs(1));
            let _ = connected.send(true);

            if let Some(frame) = pending.take() {
                if let Err(e) = framed.send(frame.clone()).await {
                    tracing::warn!("Resend after reconnect failed: {}", e);
                    pending = Some(frame);
                    let _ = connected.send(false);
                    continue;
                }
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = connected.send(false);
                        return;
                    }

                    outgoing = outgoing_rx.recv() => {
                        let Some(frame) = outgoing else {
                            let _ = connected.send(false);
                            return;
                        };
                        if let Err(e) = framed.send(frame.clone()).await {
                            tracing::warn!("Send failed, reconnecting: {}", e);
                            pending = Some(frame);
                            break;
                        }
                    }

                    incoming = framed.next() => {
                        match incoming {
                            Some(Ok(frame)) => {
                                if let Some(route) = inbound_tx.get(&frame.channel) {
                                    if route.send(frame).await.is_err() {
                                        let _ = connected.send(false);
                                        return;
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                tracing::warn!("Decode error, reconnecting: {}", e);
                                break;
                            }
                            None => {
                                tracing::info!("Server closed the connection");
                                break;
                            }
                        }
                    }
                }
            }

            let _ = connected.send(false);
        }
        let _ = connected.send(false);
    }
}

#[async_trait]
impl ClientDriver for TcpClientDriver {
    async fn connect(&self) -> Result<(), DriverError> {
        let outgoing_rx = self
            .outgoing_rx
            .lock()
            .await
            .take()
            .ok_or(DriverError::Closed)?;

        let mut connected_rx = self.connected.subscribe();

        tokio::spawn(Self::supervise(
            self.server_address.clone(),
            self.identity.clone(),
            outgoing_rx,
            self.inbound_tx.clone(),
            self.connected.clone(),
            self.cancel.clone(),
        ));

        // Wait for the first successful connection; later drops are handled
        // by the supervisor transparently.
        loop {
            if *connected_rx.borrow() {
                return Ok(());
            }
            if connected_rx.changed().await.is_err() {
                return Err(DriverError::Closed);
            }
        }
    }

    async fn send(&self, frame: Frame) -> Result<(), DriverError> {
        if self.cancel.is_cancelled() {
            return Err(DriverError::Closed);
        }
        self.outgoing_tx
            .send(frame)
            .await
            .map_err(|_| DriverError::Closed)
    }

    async fn recv(&self, channel: Channel) -> Option<Frame> {
        let mut rx = self.inbound_rx.get(&channel)?.lock().await;
        rx.recv().await
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_frame(identity: &str, command: &str) -> Frame {
        let mut payload = FramePayload::control(Uuid::new_v4(), Control::JobDispatch);
        payload.command = command.to_string();
        payload.identity = identity.to_string();
        Frame::new(Channel::Job, payload)
    }

    async fn connected_pair() -> (Arc<TcpServerDriver>, Arc<TcpClientDriver>) {
        let server = Arc::new(TcpServerDriver::new("127.0.0.1:0"));
        server.bind().await.unwrap();
        let addr = server.local_addr().unwrap();

        let client = Arc::new(TcpClientDriver::new(
            addr.to_string(),
            Identity::new("node1"),
        ));
        client.connect().await.unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn test_handshake_registers_identity() {
        let (server, client) = connected_pair().await;

        // The identifying heartbeat is routed like any other frame
        let delivery = server.recv(Channel::Heartbeat).await.unwrap();
        assert_eq!(delivery.identity, Identity::new("node1"));
        assert_eq!(delivery.frame.payload.control, Control::HeartbeatNotice);
        assert_eq!(server.connected(), vec![Identity::new("node1")]);

        client.close();
        server.close();
    }

    #[tokio::test]
    async fn test_server_to_client_job_roundtrip() {
        let (server, client) = connected_pair().await;
        let _ = server.recv(Channel::Heartbeat).await.unwrap();

        let identity = Identity::new("node1");
        server
            .send(&identity, job_frame("node1", "RUN"))
            .await
            .unwrap();

        let frame = client.recv(Channel::Job).await.unwrap();
        assert_eq!(frame.payload.command, "RUN");

        // Client answers on the return channel
        let reply = Frame::new(
            Channel::Return,
            FramePayload::control(frame.payload.message_id, Control::JobEnd)
                .with_identity("node1"),
        );
        client.send(reply).await.unwrap();

        let delivery = server.recv(Channel::Return).await.unwrap();
        assert_eq!(delivery.identity, identity);
        assert_eq!(delivery.frame.payload.control, Control::JobEnd);

        client.close();
        server.close();
    }

    #[tokio::test]
    async fn test_send_to_unknown_identity() {
        let server = TcpServerDriver::new("127.0.0.1:0");
        server.bind().await.unwrap();

        let result = server
            .send(&Identity::new("ghost"), job_frame("ghost", "RUN"))
            .await;
        assert!(matches!(result, Err(DriverError::NotConnected(_))));
        server.close();
    }

    #[tokio::test]
    async fn test_channel_isolation() {
        let (server, client) = connected_pair().await;
        let _ = server.recv(Channel::Heartbeat).await.unwrap();

        let identity = Identity::new("node1");
        server
            .send(&identity, job_frame("node1", "FIRST"))
            .await
            .unwrap();

        // A heartbeat must not surface on the job channel
        client
            .send(Frame::new(
                Channel::Heartbeat,
                FramePayload::control(Uuid::new_v4(), Control::HeartbeatNotice)
                    .with_identity("node1"),
            ))
            .await
            .unwrap();

        let job = client.recv(Channel::Job).await.unwrap();
        assert_eq!(job.payload.command, "FIRST");

        let hb = server.recv(Channel::Heartbeat).await.unwrap();
        assert_eq!(hb.frame.channel, Channel::Heartbeat);

        client.close();
        server.close();
    }
}
