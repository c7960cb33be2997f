// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cosim transport server.
//!
//! [`RpcServer`] is owned by synchronous code (the simulator side). `run`
//! starts a tokio runtime on its own OS thread and returns once the listener
//! is bound; `stop` shuts the runtime down and joins that thread.

use crate::config::ServerConfig;
use crate::MessageData;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub mod channels;
pub mod connection;
pub mod protocol;

pub use channels::{ChannelRegistry, PendingRead, ReadChannelPort, WriteChannelPort};
pub use connection::{ConnectionError, FramedConnection};
use protocol::{ClientRequest, ServerMessage, ERR_MALFORMED, ERR_NO_MANIFEST, ERR_UNKNOWN_CHANNEL};

/// Versioned, compressed manifest supplied by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub esi_version: i32,
    pub compressed: Vec<u8>,
}

/// State shared between the owner and the transport tasks.
struct Shared {
    config: ServerConfig,
    channels: ChannelRegistry,
    manifest: RwLock<Option<Manifest>>,
}

/// Handle to the background transport thread.
struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    thread: JoinHandle<()>,
}

/// Cosim transport server.
pub struct RpcServer {
    shared: Arc<Shared>,
    running: Option<Running>,
}

impl RpcServer {
    /// Create a server. Nothing is bound until [`RpcServer::run`].
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                channels: ChannelRegistry::new(),
                manifest: RwLock::new(None),
            }),
            running: None,
        })
    }

    /// Register a from-host channel.
    pub fn register_read_port(&self, id: &str, type_id: &str) -> Arc<ReadChannelPort> {
        debug!("Registering read port {} ({})", id, type_id);
        self.shared.channels.register_read_port(id, type_id)
    }

    /// Register a to-host channel.
    pub fn register_write_port(&self, id: &str, type_id: &str) -> Arc<WriteChannelPort> {
        debug!("Registering write port {} ({})", id, type_id);
        self.shared.channels.register_write_port(id, type_id)
    }

    /// Store the manifest served to clients. Replaces any previous one.
    pub fn set_manifest(&self, esi_version: i32, compressed: Vec<u8>) {
        *self.shared.manifest.write() = Some(Manifest {
            esi_version,
            compressed,
        });
    }

    pub fn manifest(&self) -> Option<Manifest> {
        self.shared.manifest.read().clone()
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.shared.channels
    }

    /// Start listening. `port` overrides the configured port; 0 lets the OS
    /// pick one. Blocks only until the listener is bound.
    pub fn run(&mut self, port: u16) -> Result<SocketAddr, ServerError> {
        if self.running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        // Bind synchronously so callers learn the port (and any bind error)
        // before this returns, even when called from inside another runtime.
        let mut addr = self.shared.config.socket_addr();
        addr.set_port(port);
        let listener =
            std::net::TcpListener::bind(addr).map_err(|e| ServerError::Bind(e.to_string()))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| ServerError::Bind(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("esi-cosim-rpc")
            .enable_all()
            .build()
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        info!("Cosim RPC server listening on {}", local_addr);

        if let Some(path) = &self.shared.config.port_file {
            let contents = format!("port: {}\nhost: {}\n", local_addr.port(), local_addr.ip());
            if let Err(e) = std::fs::write(path, contents) {
                warn!("Failed to write port file {:?}: {}", path, e);
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = self.shared.clone();
        let thread = std::thread::Builder::new()
            .name("esi-cosim-server".into())
            .spawn(move || {
                runtime.block_on(async move {
                    match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => accept_loop(listener, shared, shutdown_rx).await,
                        Err(e) => error!("Failed to register listener: {}", e),
                    }
                });
                // Dropping the runtime cancels every connection task.
            })
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        self.running = Some(Running {
            local_addr,
            shutdown: shutdown_tx,
            thread,
        });
        Ok(local_addr)
    }

    /// Address the server is bound to, if running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Stop serving and close every channel. No-op if not running.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(true);
            if running.thread.join().is_err() {
                error!("Cosim server thread panicked");
            }
            info!("Cosim RPC server on {} stopped", running.local_addr);
        }
        self.shared.channels.close_all();
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: tokio::net::TcpListener,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        info!("New client connection from {}", peer_addr);
                        let shared = shared.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer_addr, shared, shutdown).await {
                                warn!("Connection error from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Messages from subscribed to-host channels, tagged with the channel id.
type Outbound = (String, MessageData);

/// Serve one client until it disconnects or the server stops.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let mut conn = FramedConnection::new(stream, peer_addr, shared.config.max_message_size);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(shared.config.client_queue_depth);
    let mut forwarders = Vec::new();

    let result = serve(
        &mut conn,
        &shared,
        &outbound_tx,
        &mut outbound_rx,
        &mut forwarders,
        shutdown,
    )
    .await;

    drop(outbound_tx);
    release_subscriptions(&shared, outbound_rx, forwarders).await;
    result
}

async fn serve(
    conn: &mut FramedConnection,
    shared: &Shared,
    outbound_tx: &mpsc::Sender<Outbound>,
    outbound_rx: &mut mpsc::Receiver<Outbound>,
    forwarders: &mut Vec<tokio::task::JoinHandle<()>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let peer_addr = conn.peer_addr();
    loop {
        tokio::select! {
            result = conn.read_frame::<ClientRequest>() => {
                match result {
                    Ok(Some(request)) => {
                        let reply = process_request(request, shared, outbound_tx, forwarders);
                        conn.send_frame(&reply).await?;
                    }
                    Ok(None) => {
                        info!("Connection closed: {}", peer_addr);
                        break;
                    }
                    Err(ConnectionError::Malformed(e)) => {
                        warn!("Malformed request from {}: {}", peer_addr, e);
                        conn.send_frame(&ServerMessage::error(ERR_MALFORMED, e)).await?;
                    }
                    Err(e) => {
                        warn!("Read error from {}: {}", peer_addr, e);
                        break;
                    }
                }
            }
            Some((channel, msg)) = outbound_rx.recv() => {
                let frame = ServerMessage::Message {
                    channel,
                    data: msg.into_vec(),
                };
                conn.send_frame(&frame).await?;
            }
            _ = shutdown.changed() => {
                debug!("Connection handler shutting down: {}", peer_addr);
                break;
            }
        }
    }

    Ok(())
}

/// Hand every message this connection did not send back to its port.
///
/// Forwarders return what they hold first; the messages left in the
/// outbound queue are older and are requeued after, landing in front.
async fn release_subscriptions(
    shared: &Shared,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    forwarders: Vec<tokio::task::JoinHandle<()>>,
) {
    outbound_rx.close();
    for forwarder in forwarders {
        let _ = forwarder.await;
    }

    let mut leftovers: Vec<(String, Vec<MessageData>)> = Vec::new();
    while let Ok((channel, msg)) = outbound_rx.try_recv() {
        match leftovers.iter_mut().find(|(c, _)| *c == channel) {
            Some((_, msgs)) => msgs.push(msg),
            None => leftovers.push((channel, vec![msg])),
        }
    }
    for (channel, msgs) in leftovers {
        if let Some(port) = shared.channels.write_port(&channel) {
            debug!("Requeueing {} undelivered messages on {}", msgs.len(), channel);
            port.requeue(msgs);
        }
    }
}

/// Move messages from a write port subscription onto the connection's
/// outbound queue until either side goes away.
async fn forward(
    port: Arc<WriteChannelPort>,
    mut rx: mpsc::UnboundedReceiver<MessageData>,
    channel: String,
    tx: mpsc::Sender<Outbound>,
) {
    loop {
        let next = tokio::select! {
            msg = rx.recv() => msg,
            _ = tx.closed() => None,
        };
        let Some(msg) = next else {
            port.unsubscribe(rx, None);
            return;
        };
        if let Err(mpsc::error::SendError((_, msg))) = tx.send((channel.clone(), msg)).await {
            port.unsubscribe(rx, Some(msg));
            return;
        }
    }
}

fn process_request(
    request: ClientRequest,
    shared: &Shared,
    outbound_tx: &mpsc::Sender<Outbound>,
    forwarders: &mut Vec<tokio::task::JoinHandle<()>>,
) -> ServerMessage {
    match request {
        ClientRequest::GetManifest => match shared.manifest.read().as_ref() {
            Some(manifest) => ServerMessage::Manifest {
                esi_version: manifest.esi_version,
                compressed_manifest: manifest.compressed.clone(),
            },
            None => ServerMessage::error(ERR_NO_MANIFEST, "Manifest not yet set"),
        },

        ClientRequest::ListChannels => ServerMessage::Channels {
            channels: shared.channels.descriptors(),
        },

        ClientRequest::SendToServer { channel, data } => {
            match shared.channels.read_port(&channel) {
                Some(port) => {
                    debug!("Client message on {} ({} bytes)", channel, data.len());
                    port.deliver(MessageData::new(data));
                    ServerMessage::Ack
                }
                None => ServerMessage::error(
                    ERR_UNKNOWN_CHANNEL,
                    format!("No from-host channel '{}'", channel),
                ),
            }
        }

        ClientRequest::ConnectToClientChannel { channel } => {
            let Some(port) = shared.channels.write_port(&channel) else {
                return ServerMessage::error(
                    ERR_UNKNOWN_CHANNEL,
                    format!("No to-host channel '{}'", channel),
                );
            };
            let rx = port.subscribe();
            forwarders.push(tokio::spawn(forward(
                port,
                rx,
                channel,
                outbound_tx.clone(),
            )));
            ServerMessage::Ack
        }
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Bind error: {0}")]
    Bind(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
    #[error("Server already running")]
    AlreadyRunning,
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<ConnectionError> for ServerError {
    fn from(e: ConnectionError) -> Self {
        Self::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            bind_address: IpAddr::from([127, 0, 0, 1]),
            ..Default::default()
        }
    }

    #[test]
    fn test_run_auto_port_and_stop() {
        let mut server = RpcServer::new(loopback_config()).unwrap();
        assert!(!server.is_running());

        let addr = server.run(0).unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(addr.ip(), IpAddr::from([127, 0, 0, 1]));
        assert_eq!(server.local_addr(), Some(addr));
        assert!(matches!(server.run(0), Err(ServerError::AlreadyRunning)));

        server.stop();
        assert!(!server.is_running());
        server.stop();
    }

    #[test]
    fn test_port_file_written() {
        let dir = tempfile::tempdir().unwrap();
        let port_file = dir.path().join("cosim.cfg");
        let config = ServerConfig {
            port_file: Some(port_file.clone()),
            ..loopback_config()
        };
        let mut server = RpcServer::new(config).unwrap();
        let addr = server.run(0).unwrap();

        let contents = std::fs::read_to_string(&port_file).unwrap();
        assert!(contents.contains(&format!("port: {}", addr.port())));
        server.stop();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ServerConfig {
            client_queue_depth: 0,
            ..Default::default()
        };
        assert!(matches!(RpcServer::new(config), Err(ServerError::Config(_))));
    }

    #[test]
    fn test_manifest_overwrite() {
        let server = RpcServer::new(loopback_config()).unwrap();
        assert!(server.manifest().is_none());
        server.set_manifest(1, vec![1, 2]);
        server.set_manifest(2, vec![3]);
        assert_eq!(
            server.manifest(),
            Some(Manifest {
                esi_version: 2,
                compressed: vec![3]
            })
        );
    }

    #[test]
    fn test_stop_closes_ports() {
        let mut server = RpcServer::new(loopback_config()).unwrap();
        server.run(0).unwrap();
        let port = server.register_read_port("E1", "u8");
        let mut pending = port.read_async();
        server.stop();
        assert!(server.channels().read_port("E1").is_none());
        assert!(pending.try_take().is_none());
    }
}
