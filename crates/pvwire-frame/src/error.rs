/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header does not start with the protocol magic byte.
    #[error("invalid frame magic 0x{found:02X} (expected 0xCA)")]
    InvalidMagic { found: u8 },

    /// The header carries a protocol version this side refuses.
    #[error("unsupported protocol version {found} (local {expected})")]
    UnsupportedVersion { found: u8, expected: u8 },

    /// The header declares a negative payload size.
    #[error("invalid payload size {0}")]
    InvalidPayloadSize(i32),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A datagram ended in the middle of a frame.
    #[error("truncated frame ({needed} bytes needed, {available} available)")]
    Truncated { needed: usize, available: usize },

    /// `end_message` was called without a matching `start_message`.
    #[error("no message is open")]
    NoOpenMessage,

    /// `start_message` was called while another message is still open.
    #[error("a message is already open")]
    MessageAlreadyOpen,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// True for errors that mean the inbound byte stream cannot be trusted.
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidMagic { .. }
                | FrameError::UnsupportedVersion { .. }
                | FrameError::InvalidPayloadSize(_)
                | FrameError::PayloadTooLarge { .. }
                | FrameError::Truncated { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
