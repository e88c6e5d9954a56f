use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::fd::{AsRawFd, RawFd};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::Path;

use parking_lot::RwLock;
use socket2::SockRef;
use tracing::debug;

use crate::error::{closed_io_error, Result, TransportError};
use crate::traits::{Socket, SocketKind};

/// A connected, non-blocking byte stream (TCP or Unix domain socket).
pub struct StreamSocket {
    inner: RwLock<Option<StreamInner>>,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
}

enum StreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl StreamSocket {
    /// Connect to a TCP endpoint (blocking connect), then switch to non-blocking.
    pub fn connect_tcp(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self> {
        let endpoint = format!("{addr:?}");
        let stream = TcpStream::connect(&addr).map_err(|source| TransportError::Connect {
            endpoint: endpoint.clone(),
            source,
        })?;
        debug!(%endpoint, "connected tcp stream");
        Self::from_tcp(stream)
    }

    /// Wrap an already connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr().ok();
        let local_addr = stream.local_addr().ok();
        Ok(Self {
            inner: RwLock::new(Some(StreamInner::Tcp(stream))),
            peer_addr,
            local_addr,
        })
    }

    /// Connect to a Unix domain socket path, then switch to non-blocking.
    #[cfg(unix)]
    pub fn connect_unix(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            endpoint: path.display().to_string(),
            source,
        })?;
        debug!(?path, "connected unix stream");
        Self::from_unix(stream)
    }

    /// Wrap an already connected Unix domain stream.
    #[cfg(unix)]
    pub fn from_unix(stream: UnixStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            inner: RwLock::new(Some(StreamInner::Unix(stream))),
            peer_addr: None,
            local_addr: None,
        })
    }

    /// A connected pair of Unix stream sockets, both non-blocking.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        Ok((Self::from_unix(left)?, Self::from_unix(right)?))
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match self.inner.read().as_ref() {
            Some(StreamInner::Tcp(_)) => "tcp",
            #[cfg(unix)]
            Some(StreamInner::Unix(_)) => "unix-stream",
            None => "closed",
        }
    }
}

impl Socket for StreamSocket {
    fn kind(&self) -> SocketKind {
        SocketKind::Stream
    }

    fn is_open(&self) -> bool {
        self.inner.read().is_some()
    }

    fn close(&self) -> Result<()> {
        let Some(inner) = self.inner.write().take() else {
            return Ok(());
        };
        let shutdown = match &inner {
            StreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        match shutdown {
            Ok(()) => {}
            // Peer already gone.
            Err(err) if err.kind() == io::ErrorKind::NotConnected => {}
            Err(err) => return Err(TransportError::Io(err)),
        }
        debug!(peer = ?self.peer_addr, "closed stream socket");
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read().as_ref() {
            Some(StreamInner::Tcp(stream)) => {
                let mut stream: &TcpStream = stream;
                stream.read(buf)
            }
            #[cfg(unix)]
            Some(StreamInner::Unix(stream)) => {
                let mut stream: &UnixStream = stream;
                stream.read(buf)
            }
            None => Err(closed_io_error()),
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.read().as_ref() {
            Some(StreamInner::Tcp(stream)) => {
                let mut stream: &TcpStream = stream;
                stream.write(buf)
            }
            #[cfg(unix)]
            Some(StreamInner::Unix(stream)) => {
                let mut stream: &UnixStream = stream;
                stream.write(buf)
            }
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
        match self.inner.read().as_ref() {
            Some(StreamInner::Tcp(stream)) => SockRef::from(stream).send_buffer_size().ok(),
            #[cfg(unix)]
            Some(StreamInner::Unix(stream)) => SockRef::from(stream).send_buffer_size().ok(),
            None => None,
        }
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> Option<RawFd> {
        match self.inner.read().as_ref() {
            Some(StreamInner::Tcp(stream)) => Some(stream.as_raw_fd()),
            Some(StreamInner::Unix(stream)) => Some(stream.as_raw_fd()),
            None => None,
        }
    }
}

impl std::fmt::Debug for StreamSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSocket")
            .field("type", &self.transport_name())
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn read_blocking(socket: &StreamSocket, buf: &mut [u8]) -> usize {
        loop {
            match socket.read(buf) {
                Ok(n) => return n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                Err(err) => panic!("read failed: {err}"),
            }
        }
    }

    #[test]
    fn pair_reads_and_writes() {
        let (left, right) = StreamSocket::pair().unwrap();
        assert_eq!(left.kind(), SocketKind::Stream);
        assert!(left.is_connected());

        assert_eq!(left.write(b"hello").unwrap(), 5);
        let mut buf = [0u8; 8];
        let n = read_blocking(&right, &mut buf);
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn read_on_empty_socket_would_block() {
        let (_left, right) = StreamSocket::pair().unwrap();
        let mut buf = [0u8; 4];
        let err = right.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn close_is_idempotent_and_fails_fast() {
        let (left, _right) = StreamSocket::pair().unwrap();
        assert!(left.is_open());
        assert!(left.raw_fd().is_some());

        left.close().unwrap();
        left.close().unwrap();

        assert!(!left.is_open());
        assert!(left.raw_fd().is_none());
        assert_eq!(
            left.write(b"x").unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        let mut buf = [0u8; 1];
        assert_eq!(
            left.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
    }

    #[test]
    fn peer_sees_eof_after_close() {
        let (left, right) = StreamSocket::pair().unwrap();
        left.close().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(read_blocking(&right, &mut buf), 0);
    }

    #[test]
    fn tcp_connect_reports_addresses() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = StreamSocket::connect_tcp(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        let server = StreamSocket::from_tcp(accepted).unwrap();

        assert_eq!(client.peer_addr(), Some(addr));
        assert_eq!(server.local_addr(), Some(addr));
        assert_eq!(client.transport_name(), "tcp");
        assert!(client.send_buffer_size().unwrap_or(0) > 0);

        client.write(b"ping").unwrap();
        let mut buf = [0u8; 4];
        let n = read_blocking(&server, &mut buf);
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn connect_to_missing_unix_path_fails() {
        let path = std::env::temp_dir().join(format!("pvwire-missing-{}.sock", std::process::id()));
        let result = StreamSocket::connect_unix(&path);
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
