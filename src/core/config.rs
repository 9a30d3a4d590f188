use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::storage::CHUNK_SIZE;
use crate::utils::{P2PError, Result};

pub const DEFAULT_DISCOVERY_PORT: u16 = 5000;
pub const DEFAULT_TRANSFER_PORT: u16 = 12345;
pub const DEFAULT_BROADCAST_INTERVAL_SECS: u64 = 3;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub shared_dir: PathBuf,
    /// Extra folders whose top-level files are advertised. Relative paths are
    /// resolved against `shared_dir`.
    pub shared_subfolders: Vec<PathBuf>,
    pub secret: String,
    pub discovery_port: u16,
    pub transfer_port: u16,
    pub broadcast_addr: Ipv4Addr,
    pub broadcast_interval_secs: u64,
    pub chunk_size: u64,
    /// Mark peers dead after this long without a beacon. `None` keeps a peer
    /// live until it says goodbye.
    pub peer_ttl_secs: Option<u64>,
    pub download: DownloadPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shared_dir: PathBuf::from("./shared"),
            shared_subfolders: Vec::new(),
            secret: String::new(),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            transfer_port: DEFAULT_TRANSFER_PORT,
            broadcast_addr: Ipv4Addr::BROADCAST,
            broadcast_interval_secs: DEFAULT_BROADCAST_INTERVAL_SECS,
            chunk_size: CHUNK_SIZE,
            peer_ttl_secs: None,
            download: DownloadPolicy::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| P2PError::ConfigError(format!("Failed to read {:?}: {}", path, e)))?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.secret.is_empty() {
            return Err(P2PError::ConfigError("secret must not be empty".to_string()));
        }
        if self.secret.contains(':') {
            return Err(P2PError::ConfigError(
                "secret must not contain ':'".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(P2PError::ConfigError("chunk_size must be positive".to_string()));
        }
        if self.broadcast_interval_secs == 0 {
            return Err(P2PError::ConfigError(
                "broadcast_interval_secs must be positive".to_string(),
            ));
        }
        if self.peer_ttl_secs == Some(0) {
            return Err(P2PError::ConfigError(
                "peer_ttl_secs must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }

    pub fn peer_ttl(&self) -> Option<Duration> {
        self.peer_ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadPolicy {
    /// Upper bound for a single size or chunk request. `None` waits forever.
    pub request_timeout_secs: Option<u64>,
    pub max_retries: u32,
    pub rotate_peers: bool,
    /// Write whatever arrived even if chunks are missing.
    pub write_partial: bool,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            request_timeout_secs: Some(30),
            max_retries: 2,
            rotate_peers: true,
            write_partial: false,
        }
    }
}

impl DownloadPolicy {
    /// No timeout, no retry, truncated files written as-is.
    pub fn best_effort() -> Self {
        Self {
            request_timeout_secs: None,
            max_retries: 0,
            rotate_peers: false,
            write_partial: true,
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}
