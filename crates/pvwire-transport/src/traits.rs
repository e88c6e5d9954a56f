use std::io;
use std::net::SocketAddr;
#[cfg(unix)]
use std::os::fd::RawFd;

use crate::error::Result;

/// Whether a socket carries a byte stream or discrete datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Connected, ordered byte stream (TCP, Unix stream).
    Stream,
    /// Connectionless datagrams (UDP).
    Datagram,
}

/// A non-blocking byte channel consumed by the connection codec.
///
/// All operations take `&self` so that the poller thread can read while an
/// application thread writes. Reads and writes never block: when the socket
/// has nothing to offer (or no room) they return `ErrorKind::WouldBlock`.
///
/// Once [`close`](Socket::close) has been called, `is_open` reports false and
/// every read or write fails with `ErrorKind::NotConnected`.
pub trait Socket: Send + Sync {
    /// Stream or datagram.
    fn kind(&self) -> SocketKind;

    /// Whether the socket is still open.
    fn is_open(&self) -> bool;

    /// Close the socket. Closing twice is not an error.
    fn close(&self) -> Result<()>;

    /// Read bytes from a connected socket.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write bytes to a connected socket.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Receive one datagram, returning its length and source address.
    fn receive(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let _ = buf;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "receive is only supported on datagram sockets",
        ))
    }

    /// Send one datagram to `dest`.
    fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        let _ = (buf, dest);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "send_to is only supported on datagram sockets",
        ))
    }

    /// Remote address, when the socket is connected to an IP peer.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Local address, when bound to an IP address.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Whether reads and writes go to a fixed peer.
    ///
    /// Stream sockets are always connected; datagram sockets only after
    /// `connect`.
    fn is_connected(&self) -> bool {
        self.kind() == SocketKind::Stream || self.peer_addr().is_some()
    }

    /// Kernel send buffer size, if it can be queried.
    fn send_buffer_size(&self) -> Option<usize> {
        None
    }

    /// Raw descriptor used for poller registration. `None` once closed.
    #[cfg(unix)]
    fn raw_fd(&self) -> Option<RawFd>;
}
