//! Socket abstraction for the pvwire codec.
//!
//! Provides a single non-blocking interface over the two transport shapes
//! the protocol runs on:
//! - connected byte streams (TCP, Unix domain sockets)
//! - connectionless datagrams (UDP), with per-datagram addressing
//!
//! This is the lowest layer of pvwire. The codec only ever talks to the
//! [`Socket`] trait, so tests can substitute in-memory sockets.

pub mod datagram;
pub mod error;
pub mod stream;
pub mod traits;

pub use datagram::DatagramSocket;
pub use error::{closed_io_error, Result, TransportError};
pub use stream::StreamSocket;
pub use traits::{Socket, SocketKind};
