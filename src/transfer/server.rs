use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep, timeout};

use crate::core::protocol::TransferRequest;
use crate::network::Transport;
use crate::storage::SharedFolder;
use crate::utils::{MetricsCollector, P2PError, Result};

const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Answers file-size and file-chunk requests from the shared folder.
/// One request per connection; the connection closes after the response.
pub struct TransferServer {
    listener: TcpListener,
    handler: Arc<RequestHandler>,
}

struct RequestHandler {
    folder: SharedFolder,
    chunk_size: u64,
    metrics: MetricsCollector,
}

impl TransferServer {
    pub async fn bind(
        addr: SocketAddr,
        folder: SharedFolder,
        chunk_size: u64,
        metrics: MetricsCollector,
    ) -> Result<Self> {
        let listener = Transport::listen(addr).await?;
        info!("Transfer server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            handler: Arc::new(RequestHandler {
                folder,
                chunk_size,
                metrics,
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("Transfer connection from {}", addr);
                    let handler = self.handler.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handler.handle_connection(stream).await {
                            warn!("Failed to serve {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

impl RequestHandler {
    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let text = timeout(REQUEST_READ_TIMEOUT, Transport::receive_request(&mut stream))
            .await
            .map_err(|_| P2PError::Timeout("waiting for request".to_string()))??;

        match TransferRequest::parse(&text)? {
            TransferRequest::FileSize { filename } => {
                let size = match self.folder.file_size(&filename).await {
                    Ok(size) => Some(size),
                    Err(P2PError::FileNotFound(_)) => {
                        debug!("Size query for unknown file {}", filename);
                        None
                    }
                    Err(e) => {
                        warn!("Could not stat {}: {}", filename, e);
                        None
                    }
                };
                if size.is_some_and(|s| s > i32::MAX as u64) {
                    warn!("{} is too large to advertise its size", filename);
                }
                Transport::send_size(&mut stream, size).await?;
                self.metrics.record_size_query_served().await;
            }
            TransferRequest::FileChunk {
                filename,
                chunk_index,
            } => {
                let data = match self
                    .folder
                    .read_chunk(&filename, chunk_index, self.chunk_size)
                    .await
                {
                    Ok(data) => data,
                    Err(P2PError::FileNotFound(_)) => {
                        debug!("Chunk request for unknown file {}", filename);
                        Vec::new()
                    }
                    Err(e) => {
                        warn!("Could not read chunk {} of {}: {}", chunk_index, filename, e);
                        Vec::new()
                    }
                };
                Transport::send_chunk(&mut stream, &data).await?;
                self.metrics.record_chunk_served(data.len() as u64).await;
                debug!("Served chunk {} of {} ({} bytes)", chunk_index, filename, data.len());
            }
        }

        Ok(())
    }
}
