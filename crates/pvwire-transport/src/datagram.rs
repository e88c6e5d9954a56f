use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
#[cfg(unix)]
use std::os::fd::{AsRawFd, RawFd};

use parking_lot::RwLock;
use socket2::SockRef;
use tracing::debug;

use crate::error::{closed_io_error, Result, TransportError};
use crate::traits::{Socket, SocketKind};

/// A non-blocking UDP socket.
///
/// Unconnected sockets exchange datagrams through [`Socket::receive`] and
/// [`Socket::send_to`]; after [`connect`](DatagramSocket::connect) the plain
/// `read`/`write` pair talks to the fixed peer.
pub struct DatagramSocket {
    inner: RwLock<Option<UdpSocket>>,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
}

impl DatagramSocket {
    /// Bind a non-blocking UDP socket.
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self> {
        let endpoint = format!("{addr:?}");
        let socket = UdpSocket::bind(&addr).map_err(|source| TransportError::Bind {
            endpoint: endpoint.clone(),
            source,
        })?;
        debug!(%endpoint, "bound datagram socket");
        Self::from_udp(socket)
    }

    /// Wrap an existing UDP socket.
    pub fn from_udp(socket: UdpSocket) -> Result<Self> {
        socket.set_nonblocking(true)?;
        let peer_addr = socket.peer_addr().ok();
        let local_addr = socket.local_addr().ok();
        Ok(Self {
            inner: RwLock::new(Some(socket)),
            peer_addr,
            local_addr,
        })
    }

    /// Fix the remote peer so that `read`/`write` can be used.
    pub fn connect(mut self, peer: SocketAddr) -> Result<Self> {
        {
            let guard = self.inner.read();
            let socket = guard.as_ref().ok_or(TransportError::Closed)?;
            socket
                .connect(peer)
                .map_err(|source| TransportError::Connect {
                    endpoint: peer.to_string(),
                    source,
                })?;
        }
        self.peer_addr = Some(peer);
        Ok(self)
    }

    /// Enable or disable sending to broadcast addresses.
    pub fn set_broadcast(&self, enabled: bool) -> Result<()> {
        let guard = self.inner.read();
        let socket = guard.as_ref().ok_or(TransportError::Closed)?;
        socket.set_broadcast(enabled)?;
        Ok(())
    }
}

impl Socket for DatagramSocket {
    fn kind(&self) -> SocketKind {
        SocketKind::Datagram
    }

    fn is_open(&self) -> bool {
        self.inner.read().is_some()
    }

    fn close(&self) -> Result<()> {
        if self.inner.write().take().is_some() {
            debug!(local = ?self.local_addr, "closed datagram socket");
        }
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read().as_ref() {
            Some(socket) => socket.recv(buf),
            None => Err(closed_io_error()),
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.read().as_ref() {
            Some(socket) => socket.send(buf),
            None => Err(closed_io_error()),
        }
    }

    fn receive(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        match self.inner.read().as_ref() {
            Some(socket) => socket.recv_from(buf),
            None => Err(closed_io_error()),
        }
    }

    fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        match self.inner.read().as_ref() {
            Some(socket) => socket.send_to(buf, dest),
            None => Err(closed_io_error()),
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn send_buffer_size(&self) -> Option<usize> {
        self.inner
            .read()
            .as_ref()
            .and_then(|socket| SockRef::from(socket).send_buffer_size().ok())
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> Option<RawFd> {
        self.inner.read().as_ref().map(|socket| socket.as_raw_fd())
    }
}

impl std::fmt::Debug for DatagramSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramSocket")
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn receive_blocking(socket: &DatagramSocket, buf: &mut [u8]) -> (usize, SocketAddr) {
        for _ in 0..1000 {
            match socket.receive(buf) {
                Ok(received) => return received,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(err) => panic!("receive failed: {err}"),
            }
        }
        panic!("no datagram received");
    }

    #[test]
    fn unconnected_send_and_receive() {
        let server = DatagramSocket::bind("127.0.0.1:0").unwrap();
        let client = DatagramSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();

        assert!(!client.is_connected());
        assert_eq!(client.send_to(b"hello", server_addr).unwrap(), 5);

        let mut buf = [0u8; 16];
        let (n, source) = receive_blocking(&server, &mut buf);
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(source, client.local_addr().unwrap());
    }

    #[test]
    fn connected_read_write() {
        let server = DatagramSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = DatagramSocket::bind("127.0.0.1:0")
            .unwrap()
            .connect(server_addr)
            .unwrap();

        assert!(client.is_connected());
        assert_eq!(client.peer_addr(), Some(server_addr));
        client.write(b"dgram").unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = receive_blocking(&server, &mut buf);
        assert_eq!(&buf[..n], b"dgram");
    }

    #[test]
    fn receive_without_data_would_block() {
        let socket = DatagramSocket::bind("127.0.0.1:0").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(
            socket.receive(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
    }

    #[test]
    fn closed_socket_fails_fast() {
        let socket = DatagramSocket::bind("127.0.0.1:0").unwrap();
        socket.close().unwrap();
        assert!(!socket.is_open());
        assert!(socket.raw_fd().is_none());
        let dest: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert_eq!(
            socket.send_to(b"x", dest).unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        assert!(matches!(
            socket.set_broadcast(true),
            Err(TransportError::Closed)
        ));
    }
}
