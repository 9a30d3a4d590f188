use log::warn;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

use crate::utils::{P2PError, Result};

pub struct NodeUtils;

impl NodeUtils {
    /// Create a UDP socket with SO_REUSEADDR (and SO_REUSEPORT on Unix if available)
    pub fn create_reusable_udp_socket(addr: SocketAddr) -> Result<UdpSocket> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| P2PError::NetworkError(format!("Failed to create socket: {}", e)))?;

        socket
            .set_reuse_address(true)
            .map_err(|e| P2PError::NetworkError(format!("Failed to set reuse_address: {}", e)))?;

        #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
        {
            if let Err(e) = socket.set_reuse_port(true) {
                warn!("Could not set SO_REUSEPORT (not critical): {}", e);
            }
        }

        socket
            .set_broadcast(true)
            .map_err(|e| P2PError::NetworkError(format!("Failed to set broadcast: {}", e)))?;

        socket
            .bind(&addr.into())
            .map_err(|e| P2PError::NetworkError(format!("Failed to bind to {}: {}", addr, e)))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| P2PError::NetworkError(format!("Failed to set nonblocking: {}", e)))?;

        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket).map_err(|e| {
            P2PError::NetworkError(format!("Failed to convert to tokio socket: {}", e))
        })
    }

    /// Ephemeral socket used for one-off broadcasts (beacons, goodbye notices).
    pub async fn create_broadcast_socket() -> Result<UdpSocket> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| P2PError::NetworkError(format!("Failed to bind sender: {}", e)))?;
        socket
            .set_broadcast(true)
            .map_err(|e| P2PError::NetworkError(format!("Failed to set broadcast: {}", e)))?;
        Ok(socket)
    }
}
