use log::debug;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::utils::{P2PError, Result};

pub const SIZE_NOT_FOUND: i32 = -1;

/// Framing for the transfer protocol.
///
/// - request: `u16` big-endian length + UTF-8 text (same bytes as Java `writeUTF` for ASCII)
/// - size response: `i32` big-endian, [`SIZE_NOT_FOUND`] when absent
/// - chunk response: `u32` big-endian length + payload, length 0 when absent
pub struct Transport;

impl Transport {
    pub async fn connect(addr: SocketAddr) -> Result<TcpStream> {
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            P2PError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
        })?;

        debug!("Connected to {}", addr);
        Ok(stream)
    }

    pub async fn listen(addr: SocketAddr) -> Result<TcpListener> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| P2PError::NetworkError(format!("Failed to bind to {}: {}", addr, e)))?;

        debug!("Listening on {}", addr);
        Ok(listener)
    }

    pub async fn send_request<W>(stream: &mut W, request: &str) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let bytes = request.as_bytes();
        let len = u16::try_from(bytes.len()).map_err(|_| P2PError::MessageTooLarge(bytes.len()))?;
        stream.write_u16(len).await?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    pub async fn receive_request<R>(stream: &mut R) -> Result<String>
    where
        R: AsyncRead + Unpin,
    {
        let len = stream.read_u16().await? as usize;
        let mut buffer = vec![0u8; len];
        stream.read_exact(&mut buffer).await?;

        String::from_utf8(buffer)
            .map_err(|e| P2PError::InvalidMessage(format!("Request is not UTF-8: {}", e)))
    }

    pub async fn send_size<W>(stream: &mut W, size: Option<u64>) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let value = size
            .and_then(|s| i32::try_from(s).ok())
            .unwrap_or(SIZE_NOT_FOUND);
        stream.write_i32(value).await?;
        stream.flush().await?;
        Ok(())
    }

    /// `None` when the peer reported the file as missing.
    pub async fn receive_size<R>(stream: &mut R) -> Result<Option<u64>>
    where
        R: AsyncRead + Unpin,
    {
        let value = stream.read_i32().await?;
        Ok(u64::try_from(value).ok())
    }

    pub async fn send_chunk<W>(stream: &mut W, data: &[u8]) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let len = u32::try_from(data.len()).map_err(|_| P2PError::MessageTooLarge(data.len()))?;
        stream.write_u32(len).await?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    pub async fn receive_chunk<R>(stream: &mut R, max_size: usize) -> Result<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        let len = stream.read_u32().await? as usize;

        if len > max_size {
            return Err(P2PError::MessageTooLarge(len));
        }

        let mut buffer = vec![0u8; len];
        stream.read_exact(&mut buffer).await?;

        Ok(buffer)
    }
}
