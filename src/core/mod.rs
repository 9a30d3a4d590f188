pub mod config;
pub mod node;
pub mod peer;
pub mod protocol;

pub use config::{Config, DownloadPolicy};
pub use node::{DownloadHandle, Node};
pub use peer::{PeerInfo, PeerTable};
pub use protocol::{DiscoveryMessage, TransferRequest};
