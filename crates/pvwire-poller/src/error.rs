use std::os::fd::RawFd;

/// Errors that can occur while registering descriptors or polling.
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    /// The OS readiness primitive failed.
    #[error("poller I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The descriptor already has an active registration.
    #[error("descriptor {fd} is already registered")]
    AlreadyRegistered { fd: RawFd },

    /// The registration was removed (or never existed).
    #[error("registration {token} is not active")]
    NotRegistered { token: usize },

    /// The poller has been dropped.
    #[error("poller stopped")]
    Stopped,

    /// `run` was called while the loop thread is alive.
    #[error("poller loop is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, PollerError>;
