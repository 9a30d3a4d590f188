use log::{debug, info, warn};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};

use crate::core::Config;
use crate::core::peer::{PeerTable, Sighting};
use crate::core::protocol::DiscoveryMessage;
use crate::storage::SharedFolder;
use crate::utils::{MetricsCollector, NodeUtils, Result};

/// Receivers read beacons into a buffer of this size; longer beacons are cut off.
pub const DATAGRAM_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    /// A beacon arrived from this peer (first sighting or refresh).
    PeerDiscovered(IpAddr),
    /// The peer said goodbye or went silent past the configured TTL.
    PeerDisconnected(IpAddr),
}

pub struct Discovery {
    secret: String,
    discovery_port: u16,
    broadcast_addr: Ipv4Addr,
    interval: Duration,
    peers: PeerTable,
    folder: SharedFolder,
    events: broadcast::Sender<NodeEvent>,
    metrics: MetricsCollector,
    broadcasting: AtomicBool,
    broadcast_shutdown: Mutex<Option<mpsc::Sender<()>>>,
}

impl Discovery {
    pub fn new(
        config: &Config,
        peers: PeerTable,
        folder: SharedFolder,
        events: broadcast::Sender<NodeEvent>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            secret: config.secret.clone(),
            discovery_port: config.discovery_port,
            broadcast_addr: config.broadcast_addr,
            interval: config.broadcast_interval(),
            peers,
            folder,
            events,
            metrics,
            broadcasting: AtomicBool::new(false),
            broadcast_shutdown: Mutex::new(None),
        }
    }

    fn target(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.broadcast_addr, self.discovery_port))
    }

    pub fn bind_listener(&self) -> Result<UdpSocket> {
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.discovery_port));
        let socket = NodeUtils::create_reusable_udp_socket(bind_addr)?;
        info!("Discovery listening on {}", bind_addr);
        Ok(socket)
    }

    pub fn spawn_listener(self: &Arc<Self>, socket: UdpSocket) -> JoinHandle<()> {
        let discovery = self.clone();
        tokio::spawn(async move { discovery.listen_loop(socket).await })
    }

    async fn listen_loop(&self, socket: UdpSocket) {
        let mut buffer = [0u8; DATAGRAM_BUFFER_SIZE];

        loop {
            match socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => {
                    self.handle_datagram(addr.ip(), &buffer[..len]).await;
                }
                Err(e) => {
                    warn!("Discovery listen error: {}", e);
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Apply one received datagram to the peer tables. Returns true if it was
    /// accepted; anything malformed, unauthorised, or received while this node
    /// is offline is dropped without further effect.
    pub async fn handle_datagram(&self, sender: IpAddr, data: &[u8]) -> bool {
        if !self.is_broadcasting() {
            debug!("Offline, ignoring datagram from {}", sender);
            return false;
        }

        let Some(message) = DiscoveryMessage::parse(data) else {
            debug!("Ignoring unrecognised datagram from {}", sender);
            return false;
        };

        if !message.is_authorized(&self.secret) {
            debug!("Ignoring datagram with foreign secret from {}", sender);
            self.metrics.record_beacon_rejected().await;
            return false;
        }

        self.metrics.record_beacon_received().await;

        match message {
            DiscoveryMessage::Announce { files, .. } => {
                if self.peers.record_discovery(sender, files).await == Sighting::New {
                    info!("Peer {} is online", sender);
                }
                let _ = self.events.send(NodeEvent::PeerDiscovered(sender));
            }
            DiscoveryMessage::Goodbye { .. } => {
                self.peers.record_goodbye(sender).await;
                let _ = self.events.send(NodeEvent::PeerDisconnected(sender));
            }
        }

        true
    }

    pub fn is_broadcasting(&self) -> bool {
        self.broadcasting.load(Ordering::SeqCst)
    }

    pub async fn start_broadcasting(self: &Arc<Self>) {
        let mut shutdown = self.broadcast_shutdown.lock().await;
        if shutdown.is_some() {
            debug!("Broadcasting already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        *shutdown = Some(shutdown_tx);
        self.broadcasting.store(true, Ordering::SeqCst);

        let discovery = self.clone();
        tokio::spawn(async move { discovery.broadcast_loop(shutdown_rx).await });
        info!("Broadcasting to {} every {:?}", self.target(), self.interval);
    }

    pub async fn stop_broadcasting(&self) {
        self.broadcasting.store(false, Ordering::SeqCst);
        if let Some(shutdown_tx) = self.broadcast_shutdown.lock().await.take() {
            let _ = shutdown_tx.send(()).await;
            info!("Broadcasting stopped");
        }
    }

    /// Same as `stop_broadcasting`, for callers that cannot await.
    pub fn halt_broadcasting(&self) {
        self.broadcasting.store(false, Ordering::SeqCst);
        if let Ok(mut shutdown) = self.broadcast_shutdown.try_lock()
            && let Some(shutdown_tx) = shutdown.take()
        {
            let _ = shutdown_tx.try_send(());
        }
    }

    async fn broadcast_loop(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        let socket = match NodeUtils::create_broadcast_socket().await {
            Ok(socket) => socket,
            Err(e) => {
                warn!("Broadcast loop could not start: {}", e);
                return;
            }
        };

        while self.is_broadcasting() {
            if let Err(e) = self.send_beacon(&socket).await {
                warn!("Discovery beacon failed: {}", e);
            }

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep(self.interval) => {}
            }
        }
        debug!("Broadcast loop exited");
    }

    async fn send_beacon(&self, socket: &UdpSocket) -> Result<()> {
        let files = self.folder.list_files().await;
        let payload = DiscoveryMessage::announce(&self.secret, files).to_bytes();

        if payload.len() > DATAGRAM_BUFFER_SIZE {
            warn!(
                "Beacon is {} bytes; receivers will only read the first {}",
                payload.len(),
                DATAGRAM_BUFFER_SIZE
            );
        }

        socket.send_to(&payload, self.target()).await?;
        self.metrics.record_beacon_sent().await;
        debug!("Beacon sent ({} bytes)", payload.len());
        Ok(())
    }

    pub async fn announce_departure(&self) -> Result<()> {
        let socket = NodeUtils::create_broadcast_socket().await?;
        let payload = DiscoveryMessage::goodbye(&self.secret).to_bytes();
        socket.send_to(&payload, self.target()).await?;
        info!("Departure announced");
        Ok(())
    }

    /// Periodically mark silent peers dead. Only used when a TTL is configured.
    pub fn spawn_expiry_sweep(self: &Arc<Self>, ttl: Duration) -> JoinHandle<()> {
        let discovery = self.clone();
        let period = (ttl / 2).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                for addr in discovery.peers.expire_stale(ttl).await {
                    let _ = discovery.events.send(NodeEvent::PeerDisconnected(addr));
                }
            }
        })
    }
}
