/// Errors that can occur in connection codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] pvwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] pvwire_frame::FrameError),

    /// Poller registration or wait error.
    #[error("poller error: {0}")]
    Poller(#[from] pvwire_poller::PollerError),

    /// The connection has been closed.
    #[error("connection closed")]
    Closed,

    /// No byte could be written for longer than the send timeout.
    #[error("send stalled for {0:?}")]
    SendTimeout(std::time::Duration),

    /// The connection is not registered with a poller.
    #[error("connection is not registered with a poller")]
    NotRegistered,

    /// A message handler or sender reported a failure.
    #[error("handler error: {0}")]
    Handler(String),

    /// An outbound message was malformed and discarded; the connection stays usable.
    #[error("message rejected: {0}")]
    Rejected(pvwire_frame::FrameError),

    /// A datagram has no destination: no recipient set and nothing received yet.
    #[error("no recipient for datagram")]
    NoRecipient,
}

impl CodecError {
    /// Whether this error leaves the connection unusable.
    pub fn is_fatal(&self) -> bool {
        match self {
            CodecError::Transport(_)
            | CodecError::Poller(_)
            | CodecError::Closed
            | CodecError::SendTimeout(_) => true,
            CodecError::Frame(err) => {
                err.is_framing_error() || matches!(err, pvwire_frame::FrameError::Io(_))
            }
            CodecError::NotRegistered
            | CodecError::Handler(_)
            | CodecError::Rejected(_)
            | CodecError::NoRecipient => false,
        }
    }
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        CodecError::Transport(pvwire_transport::TransportError::Io(err))
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality() {
        let io = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(CodecError::from(io).is_fatal());
        assert!(CodecError::SendTimeout(std::time::Duration::from_secs(1)).is_fatal());
        assert!(CodecError::from(pvwire_frame::FrameError::InvalidMagic { found: 0 }).is_fatal());

        assert!(!CodecError::from(pvwire_frame::FrameError::MessageAlreadyOpen).is_fatal());
        assert!(!CodecError::Handler("bad request".into()).is_fatal());
        assert!(!CodecError::NoRecipient.is_fatal());
        let too_large = pvwire_frame::FrameError::PayloadTooLarge { size: 9, max: 4 };
        assert!(!CodecError::Rejected(too_large).is_fatal());
    }
}
