//! LAN Share
//!
//! Peer-to-peer file sharing on a local network: broadcast discovery, a small
//! chunk-transfer protocol over TCP, and downloads pulled from several peers at once.

pub mod core;
pub mod network;
pub mod storage;
pub mod transfer;
pub mod utils;

// Re-export main types
pub use core::{Config, DownloadHandle, DownloadPolicy, Node};
pub use network::{Discovery, NodeEvent};
pub use storage::SharedFolder;
pub use transfer::{DownloadEvent, DownloadReport};
pub use utils::{
    MetricsCollector, NodeUtils,
    error::{P2PError, Result},
};
