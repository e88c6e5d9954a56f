use std::io::{self, ErrorKind};

use bytes::BytesMut;
use tracing::trace;

use crate::codec::{decode_frame, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 16 * 1024;

/// Incremental frame assembler over a receive buffer.
///
/// Bytes are appended with [`fill_from`](FrameReader::fill_from) whenever the
/// socket has data; complete frames are taken out with
/// [`next_frame`](FrameReader::next_frame). A frame whose payload has not
/// fully arrived stays buffered until a later fill completes it. Consumed
/// space at the front of the buffer is reclaimed on the next fill instead of
/// growing the allocation.
pub struct FrameReader {
    buf: BytesMut,
    config: FrameConfig,
    chunk_size: usize,
}

impl FrameReader {
    /// Create a new frame reader with default configuration.
    pub fn new() -> Self {
        Self::with_config(INITIAL_BUFFER_CAPACITY, FrameConfig::default())
    }

    /// Create a new frame reader reading `chunk_size` bytes per fill.
    pub fn with_config(chunk_size: usize, config: FrameConfig) -> Self {
        let chunk_size = chunk_size.max(HEADER_SIZE);
        Self {
            buf: BytesMut::with_capacity(chunk_size),
            config,
            chunk_size,
        }
    }

    /// Read once from `source` into the buffer.
    ///
    /// `source` receives a writable slice and returns how many bytes it
    /// filled, exactly like `Read::read`. `Interrupted` is retried; every
    /// other error (including `WouldBlock`) is returned unchanged.
    pub fn fill_from<F>(&mut self, mut source: F) -> io::Result<usize>
    where
        F: FnMut(&mut [u8]) -> io::Result<usize>,
    {
        // Reclaims consumed front space when the buffer is uniquely owned.
        self.buf.reserve(self.chunk_size);
        let start = self.buf.len();
        self.buf.resize(start + self.chunk_size, 0);

        let result = loop {
            match source(&mut self.buf[start..]) {
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        let read = *result.as_ref().unwrap_or(&0);
        self.buf.truncate(start + read);
        if read > 0 {
            trace!(read, buffered = self.buf.len(), "filled receive buffer");
        }
        result
    }

    /// Append bytes that were received elsewhere.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        decode_frame(&mut self.buf, &self.config)
    }

    /// Take the next frame out of a buffer that must end on a frame boundary.
    ///
    /// Used for datagrams: leftover bytes that do not form a complete frame
    /// are reported as [`FrameError::Truncated`].
    pub fn next_frame_exact(&mut self) -> Result<Option<Frame>> {
        match self.next_frame()? {
            Some(frame) => Ok(Some(frame)),
            None if self.buf.is_empty() => Ok(None),
            None => Err(FrameError::Truncated {
                needed: self.needed().unwrap_or(HEADER_SIZE),
                available: self.buf.len(),
            }),
        }
    }

    /// Total bytes needed for the frame at the front of the buffer, if its
    /// header has arrived.
    fn needed(&self) -> Option<usize> {
        let header = crate::codec::MessageHeader::parse(&self.buf[..])?;
        usize::try_from(header.payload_size)
            .ok()
            .map(|size| HEADER_SIZE + size)
    }

    /// Move everything buffered into a new reader, leaving this one empty.
    ///
    /// Lets a datagram be decoded without holding on to the receive buffer.
    pub fn split(&mut self) -> FrameReader {
        FrameReader {
            buf: self.buf.split(),
            config: self.config.clone(),
            chunk_size: self.chunk_size,
        }
    }

    /// Bytes currently buffered (complete or not).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether a partial frame is waiting for more bytes.
    pub fn has_partial_frame(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Allocated capacity of the receive buffer.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Release the buffer allocation.
    pub fn release(&mut self) {
        self.buf = BytesMut::new();
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("buffered", &self.buf.len())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}
