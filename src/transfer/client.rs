use async_trait::async_trait;
use log::debug;
use std::net::{IpAddr, SocketAddr};

use crate::core::config::Config;
use crate::core::protocol::TransferRequest;
use crate::network::Transport;
use crate::utils::{P2PError, Result};

pub const MAX_CHUNK_RESPONSE: usize = 16 * 1024 * 1024;

#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn file_size(&self, filename: &str, peer: IpAddr) -> Result<u64>;

    async fn file_chunk(&self, filename: &str, peer: IpAddr, chunk_index: u32) -> Result<Vec<u8>>;
}

/// One request per fresh TCP connection to the peer's transfer port.
#[derive(Debug, Clone)]
pub struct TransferClient {
    port: u16,
    max_chunk_size: usize,
}

impl TransferClient {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            max_chunk_size: MAX_CHUNK_RESPONSE,
        }
    }

    /// Accepts chunks as large as the configured chunk size, and never less
    /// than [`MAX_CHUNK_RESPONSE`].
    pub fn for_config(config: &Config) -> Self {
        let limit = usize::try_from(config.chunk_size)
            .unwrap_or(usize::MAX)
            .max(MAX_CHUNK_RESPONSE);
        Self::new(config.transfer_port).with_max_chunk_size(limit)
    }

    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    fn peer_addr(&self, peer: IpAddr) -> SocketAddr {
        SocketAddr::new(peer, self.port)
    }

    pub async fn request_file_size(&self, filename: &str, peer: IpAddr) -> Result<u64> {
        let mut stream = Transport::connect(self.peer_addr(peer)).await?;
        let request = TransferRequest::file_size(filename).to_string();
        Transport::send_request(&mut stream, &request).await?;

        let size = Transport::receive_size(&mut stream).await?;
        debug!("Size of {} at {}: {:?}", filename, peer, size);
        size.ok_or_else(|| P2PError::FileNotFound(format!("{} at {}", filename, peer)))
    }

    pub async fn request_file_chunk(
        &self,
        filename: &str,
        peer: IpAddr,
        chunk_index: u32,
    ) -> Result<Vec<u8>> {
        let mut stream = Transport::connect(self.peer_addr(peer)).await?;
        let request = TransferRequest::file_chunk(filename, chunk_index).to_string();
        Transport::send_request(&mut stream, &request).await?;

        let data = Transport::receive_chunk(&mut stream, self.max_chunk_size).await?;
        if data.is_empty() {
            return Err(P2PError::FileNotFound(format!(
                "{} chunk {} at {}",
                filename, chunk_index, peer
            )));
        }

        debug!(
            "Received chunk {} of {} from {} ({} bytes)",
            chunk_index,
            filename,
            peer,
            data.len()
        );
        Ok(data)
    }
}

#[async_trait]
impl ChunkSource for TransferClient {
    async fn file_size(&self, filename: &str, peer: IpAddr) -> Result<u64> {
        self.request_file_size(filename, peer).await
    }

    async fn file_chunk(&self, filename: &str, peer: IpAddr, chunk_index: u32) -> Result<Vec<u8>> {
        self.request_file_chunk(filename, peer, chunk_index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serves exactly one connection with a canned response.
    async fn one_shot_server(response: Vec<u8>) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = Transport::receive_request(&mut stream).await.unwrap();
            stream.write_all(&response).await.unwrap();
            request
        });
        (port, handle)
    }

    fn localhost() -> IpAddr {
        IpAddr::from([127, 0, 0, 1])
    }

    #[tokio::test]
    async fn test_size_request() {
        let (port, server) = one_shot_server(600_000i32.to_be_bytes().to_vec()).await;
        let client = TransferClient::new(port);

        assert_eq!(client.request_file_size("notes.txt", localhost()).await.unwrap(), 600_000);
        assert_eq!(server.await.unwrap(), "FileSizeRequest:notes.txt");
    }

    #[tokio::test]
    async fn test_size_not_found() {
        let (port, _server) = one_shot_server((-1i32).to_be_bytes().to_vec()).await;
        let client = TransferClient::new(port);

        assert!(matches!(
            client.request_file_size("missing", localhost()).await,
            Err(P2PError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_chunk_request() {
        let mut response = 3u32.to_be_bytes().to_vec();
        response.extend_from_slice(b"abc");
        let (port, server) = one_shot_server(response).await;
        let client = TransferClient::new(port);

        let data = client.request_file_chunk("doc.txt", localhost(), 4).await.unwrap();
        assert_eq!(data, b"abc");
        assert_eq!(server.await.unwrap(), "FileChunkRequest:doc.txt:4");
    }

    #[tokio::test]
    async fn test_empty_chunk_is_not_found() {
        let (port, _server) = one_shot_server(0u32.to_be_bytes().to_vec()).await;
        let client = TransferClient::new(port);

        assert!(matches!(
            client.request_file_chunk("doc.txt", localhost(), 0).await,
            Err(P2PError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_chunk_is_rejected() {
        let mut response = 100u32.to_be_bytes().to_vec();
        response.extend_from_slice(&[0u8; 100]);
        let (port, _server) = one_shot_server(response).await;
        let client = TransferClient::new(port).with_max_chunk_size(10);

        assert!(matches!(
            client.request_file_chunk("doc.txt", localhost(), 0).await,
            Err(P2PError::MessageTooLarge(100))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_connection_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = TransferClient::new(port);
        let err = client.request_file_size("doc.txt", localhost()).await.unwrap_err();
        assert!(matches!(err, P2PError::ConnectionFailed(_)));
        assert!(err.is_transport_failure());
    }

    #[tokio::test]
    async fn test_configured_chunk_size_raises_limit() {
        let len = MAX_CHUNK_RESPONSE + 1;
        let mut response = (len as u32).to_be_bytes().to_vec();
        response.resize(4 + len, 9);
        let (port, _server) = one_shot_server(response).await;

        let config = Config {
            transfer_port: port,
            chunk_size: 32 * 1024 * 1024,
            ..Default::default()
        };
        let client = TransferClient::for_config(&config);
        let data = client.request_file_chunk("big.iso", localhost(), 0).await.unwrap();
        assert_eq!(data.len(), len);
    }

    #[tokio::test]
    async fn test_default_limit_applies_to_small_chunk_sizes() {
        let mut response = ((MAX_CHUNK_RESPONSE + 1) as u32).to_be_bytes().to_vec();
        response.extend_from_slice(&[0u8; 16]);
        let (port, _server) = one_shot_server(response).await;

        let config = Config {
            transfer_port: port,
            ..Default::default()
        };
        assert!(matches!(
            TransferClient::for_config(&config)
                .request_file_chunk("big.iso", localhost(), 0)
                .await,
            Err(P2PError::MessageTooLarge(_))
        ));
    }
}
