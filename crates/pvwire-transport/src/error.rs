/// Errors that can occur in socket transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {endpoint}: {source}")]
    Bind {
        endpoint: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket has been closed.
    #[error("socket closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// The `io::Error` returned by reads and writes on a closed socket.
pub fn closed_io_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "socket closed")
}
