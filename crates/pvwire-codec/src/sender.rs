use std::net::SocketAddr;

use bytes::{BufMut, BytesMut};
use pvwire_frame::HEADER_SIZE;

use crate::cache::SerializableField;
use crate::connection::{Connection, WriteState};
use crate::error::Result;

/// Something that wants to write one message on a connection.
///
/// `send` runs under the connection's writer lock, bracketed by `lock` and
/// `unlock`. It runs exactly once per enqueue, either on the enqueuing
/// thread or later on whichever thread drains the send queue.
pub trait TransportSender: Send + Sync {
    /// Called right before `send`.
    fn lock(&self) {}

    /// Called right after `send`, even when it failed.
    fn unlock(&self) {}

    /// Serialize the message through `control`.
    fn send(&self, control: &mut SendControl<'_>) -> Result<()>;
}

impl<F> TransportSender for F
where
    F: Fn(&mut SendControl<'_>) -> Result<()> + Send + Sync,
{
    fn send(&self, control: &mut SendControl<'_>) -> Result<()> {
        self(control)
    }
}

/// Holds a sender's `lock`/`unlock` bracket for the scope of one `send`.
pub(crate) struct SenderGuard<'a> {
    sender: &'a dyn TransportSender,
}

impl<'a> SenderGuard<'a> {
    pub(crate) fn lock(sender: &'a dyn TransportSender) -> Self {
        sender.lock();
        Self { sender }
    }
}

impl Drop for SenderGuard<'_> {
    fn drop(&mut self) {
        self.sender.unlock();
    }
}

/// The write side of a connection as seen by a [`TransportSender`].
pub struct SendControl<'a> {
    pub(crate) connection: &'a Connection,
    pub(crate) state: &'a mut WriteState,
}

impl SendControl<'_> {
    /// Make sure `size` more bytes fit in the send buffer.
    ///
    /// Completed messages are flushed to the socket first, blocking under
    /// backpressure. The buffer only grows past its limit when the open
    /// message alone needs the room.
    pub fn ensure_buffer(&mut self, size: usize) -> Result<()> {
        if self.state.buffer.has_room(size) {
            return Ok(());
        }
        if !self.state.buffer.flushable().is_empty() {
            self.connection.flush_buffer(self.state, true)?;
        }
        if !self.state.buffer.has_room(size) {
            self.state.buffer.grow(size);
        }
        Ok(())
    }

    /// Open a message. `flags` may carry `FLAG_CONTROL` and segmentation bits.
    pub fn start_message(&mut self, flags: u8, command: u8) -> Result<()> {
        self.ensure_buffer(HEADER_SIZE)?;
        self.state.buffer.start_message(flags, command)?;
        Ok(())
    }

    /// Close the open message, patching the payload size into its header.
    pub fn end_message(&mut self) -> Result<usize> {
        let size = self.state.buffer.end_message()?;
        self.connection.stats().record_message_sent();
        Ok(size)
    }

    /// Write a complete message.
    pub fn put_message(&mut self, flags: u8, command: u8, payload: &[u8]) -> Result<()> {
        self.start_message(flags, command)?;
        self.put_slice(payload)?;
        self.end_message()?;
        Ok(())
    }

    /// Append payload bytes to the open message.
    pub fn put_slice(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_buffer(bytes.len())?;
        self.state.buffer.buffer_mut().put_slice(bytes);
        Ok(())
    }

    /// Direct access to the send buffer. Call `ensure_buffer` first.
    pub fn buffer(&mut self) -> &mut BytesMut {
        self.state.buffer.buffer_mut()
    }

    /// Append `field`, reusing its cached encoding when caching is enabled.
    pub fn cached_serialize(&mut self, field: &dyn SerializableField) -> Result<()> {
        let encoded = self.connection.cache().lock().encode(field);
        self.put_slice(&encoded)
    }

    /// Push every completed message to the socket now.
    pub fn flush(&mut self) -> Result<()> {
        self.connection.flush_buffer(self.state, true)?;
        Ok(())
    }

    /// Destination of this sender's datagram. Defaults to the last read
    /// address; ignored by stream and connected datagram sockets.
    pub fn set_recipient(&mut self, recipient: SocketAddr) {
        self.state.recipient = Some(recipient);
    }

    pub fn recipient(&self) -> Option<SocketAddr> {
        self.state.recipient
    }

    /// The connection being written to.
    pub fn connection(&self) -> &Connection {
        self.connection
    }
}
