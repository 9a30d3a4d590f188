use log::{info, warn};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::core::config::Config;
use crate::core::peer::PeerTable;
use crate::network::{Discovery, NodeEvent};
use crate::storage::SharedFolder;
use crate::transfer::client::{ChunkSource, TransferClient};
use crate::transfer::downloader::{DownloadEvent, DownloadReport, Downloader};
use crate::transfer::server::TransferServer;
use crate::utils::{MetricsCollector, P2PError, Result};

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct DownloadHandle {
    pub events: mpsc::UnboundedReceiver<DownloadEvent>,
    completion: JoinHandle<Result<DownloadReport>>,
}

impl DownloadHandle {
    /// Next progress event. `None` once every chunk task has finished.
    pub async fn next_event(&mut self) -> Option<DownloadEvent> {
        self.events.recv().await
    }

    pub async fn wait(self) -> Result<DownloadReport> {
        self.completion.await?
    }
}

pub struct Node {
    config: Config,
    peers: PeerTable,
    folder: SharedFolder,
    discovery: Arc<Discovery>,
    downloader: Arc<Downloader>,
    metrics: MetricsCollector,
    events: broadcast::Sender<NodeEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    pub async fn new(config: Config) -> Result<Self> {
        let source = Arc::new(TransferClient::for_config(&config));
        Self::with_chunk_source(config, source).await
    }

    pub async fn with_chunk_source(config: Config, source: Arc<dyn ChunkSource>) -> Result<Self> {
        config.validate()?;

        let folder = SharedFolder::new(
            config.shared_dir.clone(),
            config.shared_subfolders.clone(),
        );
        folder.ensure_root().await?;

        let peers = PeerTable::new();
        let metrics = MetricsCollector::new();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let discovery = Arc::new(Discovery::new(
            &config,
            peers.clone(),
            folder.clone(),
            events.clone(),
            metrics.clone(),
        ));
        let downloader = Arc::new(Downloader::new(
            peers.clone(),
            folder.clone(),
            source,
            config.chunk_size,
            config.download.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            config,
            peers,
            folder,
            discovery,
            downloader,
            metrics,
            events,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub async fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Err(P2PError::NetworkError("node is already running".to_string()));
        }

        info!(
            "Starting LAN share node: sharing {:?}, discovery port {}, transfer port {}",
            self.folder.root(),
            self.config.discovery_port,
            self.config.transfer_port
        );

        // Both ports are bound before anything is spawned, so a failed start
        // leaves nothing running.
        let socket = self.discovery.bind_listener()?;
        let server = TransferServer::bind(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.transfer_port)),
            self.folder.clone(),
            self.config.chunk_size,
            self.metrics.clone(),
        )
        .await?;

        tasks.push(self.discovery.spawn_listener(socket));
        tasks.push(server.spawn());

        if let Some(ttl) = self.config.peer_ttl() {
            tasks.push(self.discovery.spawn_expiry_sweep(ttl));
        }

        self.discovery.start_broadcasting().await;
        Ok(())
    }

    pub async fn run(&self) -> Result<()> {
        self.start().await?;

        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down");

        self.shutdown().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    pub async fn list_local_files(&self) -> Vec<String> {
        self.folder.list_files().await
    }

    /// Every catalog ever advertised, keyed by peer, live or not.
    pub async fn list_peer_files(&self) -> BTreeMap<IpAddr, Vec<String>> {
        self.peers.catalogs().await
    }

    pub async fn peer_is_live(&self, addr: IpAddr) -> bool {
        self.peers.is_live(&addr).await
    }

    pub async fn available_files(&self) -> Vec<String> {
        let local = self.list_local_files().await;
        self.peers.available_files(&local).await
    }

    pub fn is_broadcasting(&self) -> bool {
        self.discovery.is_broadcasting()
    }

    pub async fn start_broadcasting(&self) {
        self.discovery.start_broadcasting().await;
    }

    pub async fn stop_broadcasting(&self) {
        self.discovery.stop_broadcasting().await;
    }

    pub async fn announce_departure(&self) -> Result<()> {
        self.discovery.announce_departure().await
    }

    pub async fn handle_datagram(&self, sender: IpAddr, data: &[u8]) -> bool {
        self.discovery.handle_datagram(sender, data).await
    }

    pub fn download_file(&self, filename: &str) -> DownloadHandle {
        let (progress_tx, events) = mpsc::unbounded_channel();
        let downloader = self.downloader.clone();
        let filename = filename.to_string();

        let completion =
            tokio::spawn(async move { downloader.download_file(&filename, Some(progress_tx)).await });

        DownloadHandle { events, completion }
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub async fn shutdown(&self) -> Result<()> {
        let was_broadcasting = self.discovery.is_broadcasting();
        self.discovery.stop_broadcasting().await;

        if was_broadcasting {
            if let Err(e) = self.discovery.announce_departure().await {
                warn!("Failed to announce departure: {}", e);
            }
        }

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        info!("Node stopped");
        Ok(())
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.discovery.halt_broadcasting();
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
