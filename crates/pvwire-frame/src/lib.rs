//! Message framing for the pvwire codec.
//!
//! Every message on the wire starts with a fixed 8-byte header:
//! - 1-byte magic (`0xCA`) for stream synchronization
//! - 1-byte protocol version
//! - 1-byte flags (control/application, client/server, segmentation)
//! - 1-byte command
//! - 4-byte big-endian signed payload size
//!
//! [`FrameReader`] assembles frames out of whatever a non-blocking socket
//! delivers; [`FrameWriter`] serializes outgoing messages and only exposes
//! bytes of completed messages for sending.

pub mod codec;
pub mod command;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, MessageHeader, Segment, VersionPolicy,
    DEFAULT_MAX_PAYLOAD, FLAG_BIG_ENDIAN, FLAG_CONTROL, FLAG_SERVER, HEADER_SIZE, MAGIC,
    PROTOCOL_VERSION, SEGMENT_MASK,
};
pub use command::command_name;
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
