//! Async UDP socket wrapper.
//!
//! Clients use a connected socket so only datagrams from the gateway reach
//! the DTLS session; the gateway peer uses an unconnected one.

use std::io;
use std::net::SocketAddr;

use tokio::net::{UdpSocket, lookup_host};

use crate::core::MAX_DATAGRAM_SIZE;

/// UDP socket with an owned receive buffer.
#[derive(Debug)]
pub struct DatagramSocket {
    /// The underlying UDP socket.
    socket: UdpSocket,
    /// Receive buffer, large enough for any datagram.
    recv_buffer: Vec<u8>,
}

impl DatagramSocket {
    /// Create a socket bound to the given address.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::from_socket(socket))
    }

    /// Resolve `address`, bind an ephemeral port of the same family and
    /// connect to the first resolved address.
    pub async fn connect(address: &str) -> io::Result<Self> {
        let peer = lookup_host(address).await?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{address} did not resolve to any address"),
            )
        })?;

        let local: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        Ok(Self::from_socket(socket))
    }

    /// Wrap an existing UDP socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            recv_buffer: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    /// Get the local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Get the connected peer address.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    /// Send a datagram to the connected address.
    pub async fn send(&self, data: &[u8]) -> io::Result<usize> {
        self.socket.send(data).await
    }

    /// Send a datagram to a specific address.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr).await
    }

    /// Receive a datagram from the connected address.
    ///
    /// Cancel-safe.
    pub async fn recv(&mut self) -> io::Result<&[u8]> {
        let len = self.socket.recv(&mut self.recv_buffer).await?;
        Ok(&self.recv_buffer[..len])
    }

    /// Receive a datagram and the sender's address.
    ///
    /// Cancel-safe.
    pub async fn recv_from(&mut self) -> io::Result<(&[u8], SocketAddr)> {
        let (len, addr) = self.socket.recv_from(&mut self.recv_buffer).await?;
        Ok((&self.recv_buffer[..len], addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_socket_bind() {
        let socket = DatagramSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = socket.local_addr().unwrap();
        assert!(addr.port() != 0);
    }

    #[tokio::test]
    async fn test_connected_send_recv() {
        let mut server = DatagramSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut client = DatagramSocket::connect(&server_addr.to_string())
            .await
            .unwrap();
        assert_eq!(client.peer_addr().unwrap(), server_addr);

        client.send(b"hello gateway").await.unwrap();
        let (received, from) = server.recv_from().await.unwrap();
        assert_eq!(received, b"hello gateway");

        server.send_to(b"hello thing", from).await.unwrap();
        assert_eq!(client.recv().await.unwrap(), b"hello thing");
    }

    #[tokio::test]
    async fn test_unparseable_address() {
        assert!(DatagramSocket::connect("no-port-here").await.is_err());
    }
}
