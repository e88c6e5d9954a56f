//! Framed, flow-controlled pvAccess-style transport.
//!
//! pvwire moves 8-byte-header messages over TCP, Unix domain and UDP
//! sockets, multiplexes readiness for many connections on one poller
//! thread, and lets concurrent producers share a connection without
//! interleaving their messages.
//!
//! # Crate Structure
//!
//! - [`transport`] — Non-blocking stream and datagram sockets
//! - [`frame`] — Message header codec, read and write buffers
//! - [`poller`] — Readiness multiplexer (behind `codec` feature)
//! - [`codec`] — Per-connection codec and sender contract (behind `codec` feature)
//! - [`logging`] — tracing subscriber setup
//! - [`config`] — JSON configuration (behind `codec` feature)

#[cfg(feature = "codec")]
pub mod config;
pub mod logging;

/// Re-export transport types.
pub mod transport {
    pub use pvwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use pvwire_frame::*;
}

/// Re-export poller types (requires `codec` feature).
#[cfg(feature = "codec")]
pub mod poller {
    pub use pvwire_poller::*;
}

/// Re-export codec types (requires `codec` feature).
#[cfg(feature = "codec")]
pub mod codec {
    pub use pvwire_codec::*;
}

#[cfg(feature = "codec")]
pub use config::{Config, ConfigError};
pub use logging::{init_logging, LogFormat, LogLevel};
