use std::io::{self, ErrorKind};

use bytes::{Buf, BufMut, BytesMut};

use crate::codec::{MessageHeader, HEADER_SIZE};
use crate::error::{FrameError, Result};

const DEFAULT_SEND_LIMIT: usize = 16 * 1024;

/// Send buffer that messages are serialized into before they hit the socket.
///
/// A message is opened with [`start_message`](FrameWriter::start_message),
/// which writes a header with a placeholder size, filled by the producer, and
/// closed with [`end_message`](FrameWriter::end_message), which patches the
/// real payload size into the header. Only bytes of closed messages are ever
/// handed to the socket ([`flushable`](FrameWriter::flushable)), so a
/// half-written message is never visible on the wire.
pub struct FrameWriter {
    buf: BytesMut,
    limit: usize,
    max_payload_size: usize,
    direction_flags: u8,
    open_message: Option<usize>,
}

impl FrameWriter {
    /// Create a writer whose buffer is normally kept below `limit` bytes.
    pub fn new(limit: usize, max_payload_size: usize) -> Self {
        let limit = limit.max(HEADER_SIZE);
        Self {
            buf: BytesMut::with_capacity(limit),
            limit,
            max_payload_size,
            direction_flags: 0,
            open_message: None,
        }
    }

    /// Flags OR-ed into every header (e.g. `FLAG_SERVER`).
    pub fn set_direction_flags(&mut self, flags: u8) {
        self.direction_flags = flags;
    }

    /// Open a new message: writes a header with a zero size placeholder.
    ///
    /// `flags` carries the control bit and segmentation; direction flags are
    /// added automatically.
    pub fn start_message(&mut self, flags: u8, command: u8) -> Result<()> {
        if self.open_message.is_some() {
            return Err(FrameError::MessageAlreadyOpen);
        }
        self.open_message = Some(self.buf.len());
        MessageHeader::new(flags | self.direction_flags, command, 0).put(&mut self.buf);
        Ok(())
    }

    /// Close the open message and patch its payload size.
    ///
    /// Returns the payload size.
    pub fn end_message(&mut self) -> Result<usize> {
        let start = self.open_message.ok_or(FrameError::NoOpenMessage)?;
        let size = self.buf.len() - start - HEADER_SIZE;
        if size > self.max_payload_size {
            self.buf.truncate(start);
            self.open_message = None;
            return Err(FrameError::PayloadTooLarge {
                size,
                max: self.max_payload_size,
            });
        }
        let encoded = (size as i32).to_be_bytes();
        self.buf[start + 4..start + HEADER_SIZE].copy_from_slice(&encoded);
        self.open_message = None;
        Ok(size)
    }

    /// Drop a half-written message.
    pub fn abort_message(&mut self) {
        if let Some(start) = self.open_message.take() {
            self.buf.truncate(start);
        }
    }

    /// Write a complete message in one call.
    pub fn put_message(&mut self, flags: u8, command: u8, payload: &[u8]) -> Result<()> {
        self.start_message(flags, command)?;
        self.buf.put_slice(payload);
        self.end_message().map(|_| ())
    }

    /// Whether a message is currently open.
    pub fn is_message_open(&self) -> bool {
        self.open_message.is_some()
    }

    /// Bytes that belong to closed messages and may be sent.
    pub fn flushable(&self) -> &[u8] {
        let end = self.open_message.unwrap_or(self.buf.len());
        &self.buf[..end]
    }

    /// Whether `additional` more bytes fit below the limit.
    pub fn has_room(&self, additional: usize) -> bool {
        self.buf.len() + additional <= self.limit
    }

    /// Grow the allocation so `additional` more bytes fit.
    pub fn grow(&mut self, additional: usize) {
        self.buf.reserve(additional);
        self.limit = self.limit.max(self.buf.len() + additional);
    }

    /// Mark `count` flushable bytes as sent.
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.flushable().len());
        self.buf.advance(count);
        if let Some(start) = self.open_message.as_mut() {
            *start -= count;
        }
    }

    /// Try once to hand the flushable bytes to `sink`.
    ///
    /// `sink` behaves like `Write::write`. Returns the number of bytes
    /// accepted; `Interrupted` is retried, other errors are returned.
    pub fn write_to<F>(&mut self, mut sink: F) -> io::Result<usize>
    where
        F: FnMut(&[u8]) -> io::Result<usize>,
    {
        if self.flushable().is_empty() {
            return Ok(0);
        }
        loop {
            match sink(self.flushable()) {
                Ok(written) => {
                    self.consume(written);
                    return Ok(written);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Mutable access to the underlying buffer for serializing payloads.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Total bytes buffered (flushable plus any open message).
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Allocated capacity of the send buffer.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Soft size limit of the buffer.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Drop everything buffered and release the allocation.
    pub fn release(&mut self) {
        self.buf = BytesMut::new();
        self.open_message = None;
    }
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_LIMIT, crate::codec::DEFAULT_MAX_PAYLOAD)
    }
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter")
            .field("buffered", &self.buf.len())
            .field("limit", &self.limit)
            .field("open_message", &self.open_message)
            .finish()
    }
}
