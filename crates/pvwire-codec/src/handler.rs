use std::net::SocketAddr;

use bytes::Bytes;
use pvwire_frame::{FrameError, MessageHeader};

use crate::connection::Connection;
use crate::error::Result;

/// One inbound message, handed to a [`MessageHandler`].
#[derive(Debug, Clone)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Bytes,
    /// Sender address: the peer of a stream, or the datagram's source.
    pub source: Option<SocketAddr>,
}

impl Message {
    pub fn command(&self) -> u8 {
        self.header.command
    }

    pub fn is_control(&self) -> bool {
        self.header.is_control()
    }
}

/// Consumer of the messages a [`Connection`] reads.
///
/// Handlers run on the thread that dispatched the read, usually the poller
/// loop thread. They may send on the same connection, close it, or call
/// [`Connection::read_poll_one`] to wait for more input.
///
/// An `Err` from a process method is logged and reading continues. Reading
/// stops once the handler closes the connection.
pub trait MessageHandler: Send + Sync {
    /// A message with the control flag set.
    fn process_control_message(&self, connection: &Connection, message: Message) -> Result<()>;

    /// A message without the control flag.
    fn process_application_message(&self, connection: &Connection, message: Message)
        -> Result<()>;

    /// Inbound bytes failed header validation.
    fn on_invalid_data(&self, connection: &Connection, error: &FrameError) {
        let _ = (connection, error);
    }

    /// The connection reached its closed state.
    fn on_closed(&self, connection: &Connection) {
        let _ = connection;
    }
}
