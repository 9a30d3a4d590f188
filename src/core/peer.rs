use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub addr: IpAddr,
    pub files: Vec<String>,
    pub live: bool,
    pub last_seen: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
    New,
    Refreshed,
}

/// Catalog and liveness tables, keyed by peer address.
///
/// Cloning yields another handle to the same tables. Catalog and liveness are
/// updated independently: a goodbye clears liveness but leaves the catalog in
/// place, so readers must check `live` before trusting `files`.
#[derive(Clone, Default)]
pub struct PeerTable {
    peers: Arc<RwLock<BTreeMap<IpAddr, PeerInfo>>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `addr` live. When `files` is `Some`, the catalog is replaced wholesale.
    pub async fn record_discovery(&self, addr: IpAddr, files: Option<Vec<String>>) -> Sighting {
        let mut peers = self.peers.write().await;
        let now = Instant::now();

        match peers.get_mut(&addr) {
            Some(peer) => {
                let sighting = if peer.live {
                    Sighting::Refreshed
                } else {
                    Sighting::New
                };
                if let Some(files) = files {
                    peer.files = files;
                }
                peer.live = true;
                peer.last_seen = now;
                debug!("Refreshed peer {} ({} files)", addr, peer.files.len());
                sighting
            }
            None => {
                let files = files.unwrap_or_default();
                info!("Discovered peer {} ({} files)", addr, files.len());
                peers.insert(
                    addr,
                    PeerInfo {
                        addr,
                        files,
                        live: true,
                        last_seen: now,
                    },
                );
                Sighting::New
            }
        }
    }

    /// Mark `addr` dead. An unknown sender is recorded as a dead peer with an
    /// empty catalog. Returns false if the peer was never seen before.
    pub async fn record_goodbye(&self, addr: IpAddr) -> bool {
        let mut peers = self.peers.write().await;
        match peers.get_mut(&addr) {
            Some(peer) => {
                peer.live = false;
                info!("Peer {} left", addr);
                true
            }
            None => {
                debug!("Goodbye from unknown peer {}", addr);
                peers.insert(
                    addr,
                    PeerInfo {
                        addr,
                        files: Vec::new(),
                        live: false,
                        last_seen: Instant::now(),
                    },
                );
                false
            }
        }
    }

    pub async fn expire_stale(&self, ttl: Duration) -> Vec<IpAddr> {
        let mut peers = self.peers.write().await;
        let mut expired = Vec::new();

        for peer in peers.values_mut() {
            if peer.live && peer.last_seen.elapsed() > ttl {
                peer.live = false;
                expired.push(peer.addr);
            }
        }

        for addr in &expired {
            info!("Peer {} expired after {:?} of silence", addr, ttl);
        }
        expired
    }

    pub async fn is_live(&self, addr: &IpAddr) -> bool {
        self.peers
            .read()
            .await
            .get(addr)
            .map(|peer| peer.live)
            .unwrap_or(false)
    }

    pub async fn catalog(&self, addr: &IpAddr) -> Option<Vec<String>> {
        self.peers.read().await.get(addr).map(|peer| peer.files.clone())
    }

    pub async fn catalogs(&self) -> BTreeMap<IpAddr, Vec<String>> {
        self.peers
            .read()
            .await
            .iter()
            .map(|(addr, peer)| (*addr, peer.files.clone()))
            .collect()
    }

    pub async fn live_peers(&self) -> Vec<IpAddr> {
        self.peers
            .read()
            .await
            .values()
            .filter(|peer| peer.live)
            .map(|peer| peer.addr)
            .collect()
    }

    /// Live peers advertising `filename`, in ascending address order.
    pub async fn peers_with_file(&self, filename: &str) -> Vec<IpAddr> {
        self.peers
            .read()
            .await
            .values()
            .filter(|peer| peer.live && peer.files.iter().any(|f| f == filename))
            .map(|peer| peer.addr)
            .collect()
    }

    pub async fn available_files(&self, local: &[String]) -> Vec<String> {
        let peers = self.peers.read().await;
        let files: BTreeSet<&String> = peers
            .values()
            .filter(|peer| peer.live)
            .flat_map(|peer| peer.files.iter())
            .filter(|file| !local.contains(file))
            .collect();
        files.into_iter().cloned().collect()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }
}
