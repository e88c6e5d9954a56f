use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Frame header: magic (1) + version (1) + flags (1) + command (1) + size (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Protocol identifier, first byte of every header.
pub const MAGIC: u8 = 0xCA;

/// Protocol version emitted by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Flags bit 7: control message (clear means application message).
pub const FLAG_CONTROL: u8 = 0x80;

/// Flags bit 6: message was sent by a server.
pub const FLAG_SERVER: u8 = 0x40;

/// Flags bit 0: payloads that follow are big-endian. Only meaningful on
/// `SET_BYTE_ORDER`.
pub const FLAG_BIG_ENDIAN: u8 = 0x01;

/// Flags bits 4-5: segmentation.
pub const SEGMENT_MASK: u8 = 0x30;

const SEGMENT_FIRST: u8 = 0x10;
const SEGMENT_LAST: u8 = 0x20;
const SEGMENT_MIDDLE: u8 = 0x30;

/// Position of a message within a segmented sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// Not segmented.
    Unsegmented,
    First,
    Middle,
    Last,
}

impl Segment {
    fn from_flags(flags: u8) -> Self {
        match flags & SEGMENT_MASK {
            SEGMENT_FIRST => Segment::First,
            SEGMENT_MIDDLE => Segment::Middle,
            SEGMENT_LAST => Segment::Last,
            _ => Segment::Unsegmented,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Segment::Unsegmented => 0,
            Segment::First => SEGMENT_FIRST,
            Segment::Middle => SEGMENT_MIDDLE,
            Segment::Last => SEGMENT_LAST,
        }
    }
}

/// The fixed 8-byte header that precedes every message.
///
/// Wire format (network byte order):
/// ```text
/// ┌───────┬─────────┬───────┬─────────┬──────────────────┐
/// │ Magic │ Version │ Flags │ Command │ Payload size     │
/// │ 0xCA  │  (1B)   │ (1B)  │  (1B)   │ (4B BE, signed)  │
/// └───────┴─────────┴───────┴─────────┴──────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: u8,
    pub version: u8,
    pub flags: u8,
    pub command: u8,
    pub payload_size: i32,
}

impl MessageHeader {
    /// A header with the local magic and version.
    pub fn new(flags: u8, command: u8, payload_size: i32) -> Self {
        Self {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            flags,
            command,
            payload_size,
        }
    }

    /// A control message header.
    pub fn control(command: u8, payload_size: i32) -> Self {
        Self::new(FLAG_CONTROL, command, payload_size)
    }

    /// An application message header.
    pub fn application(command: u8, payload_size: i32) -> Self {
        Self::new(0, command, payload_size)
    }

    /// Whether the control bit is set.
    pub fn is_control(&self) -> bool {
        self.flags & FLAG_CONTROL != 0
    }

    /// Whether the message was sent by a server.
    pub fn is_server(&self) -> bool {
        self.flags & FLAG_SERVER != 0
    }

    /// Whether a `SET_BYTE_ORDER` announces big-endian payloads.
    pub fn is_big_endian(&self) -> bool {
        self.flags & FLAG_BIG_ENDIAN != 0
    }

    /// Segmentation state carried in the flags.
    pub fn segment(&self) -> Segment {
        Segment::from_flags(self.flags)
    }

    /// Copy of this header with the segmentation bits replaced.
    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.flags = (self.flags & !SEGMENT_MASK) | segment.bits();
        self
    }

    /// Encode into the 8-byte wire representation.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let size = self.payload_size.to_be_bytes();
        [
            self.magic,
            self.version,
            self.flags,
            self.command,
            size[0],
            size[1],
            size[2],
            size[3],
        ]
    }

    /// Append the encoded header to `dst`.
    pub fn put(&self, dst: &mut BytesMut) {
        dst.put_slice(&self.encode());
    }

    /// Parse a header without validating it.
    ///
    /// Returns `None` if `src` holds fewer than [`HEADER_SIZE`] bytes.
    pub fn parse(src: &[u8]) -> Option<Self> {
        if src.len() < HEADER_SIZE {
            return None;
        }
        let mut cursor = &src[..HEADER_SIZE];
        Some(Self {
            magic: cursor.get_u8(),
            version: cursor.get_u8(),
            flags: cursor.get_u8(),
            command: cursor.get_u8(),
            payload_size: cursor.get_i32(),
        })
    }

    /// Validate magic, version and size; returns the payload length.
    pub fn validate(&self, config: &FrameConfig) -> Result<usize> {
        if self.magic != MAGIC {
            return Err(FrameError::InvalidMagic { found: self.magic });
        }
        if self.version != PROTOCOL_VERSION && config.version_policy == VersionPolicy::Reject {
            return Err(FrameError::UnsupportedVersion {
                found: self.version,
                expected: PROTOCOL_VERSION,
            });
        }
        if self.payload_size < 0 {
            return Err(FrameError::InvalidPayloadSize(self.payload_size));
        }
        let size = self.payload_size as usize;
        if size > config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: config.max_payload_size,
            });
        }
        Ok(size)
    }
}

/// A decoded message: header plus its payload.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: MessageHeader,
    pub payload: Bytes,
}

impl Frame {
    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a complete message into the wire format.
pub fn encode_frame(flags: u8, command: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let size = i32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: i32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    MessageHeader::new(flags, command, size).put(dst);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// The header is validated as soon as it is complete, so a corrupt stream is
/// reported before its (bogus) payload length is waited for.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Frame>> {
    let Some(header) = MessageHeader::parse(&src[..]) else {
        return Ok(None); // Need more data
    };
    let payload_len = header.validate(config)?;

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { header, payload }))
}

/// How to treat a header whose version differs from [`PROTOCOL_VERSION`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPolicy {
    /// Accept any version; the payload layer decides.
    #[default]
    Tolerate,
    /// Treat a mismatch as a framing error.
    Reject,
}

/// Configuration for the frame codec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Version mismatch handling. Default: tolerate.
    pub version_policy: VersionPolicy,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            version_policy: VersionPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn header_roundtrip(
            magic in any::<u8>(),
            version in any::<u8>(),
            flags in any::<u8>(),
            command in any::<u8>(),
            payload_size in any::<i32>(),
        ) {
            let header = MessageHeader { magic, version, flags, command, payload_size };
            let decoded = MessageHeader::parse(&header.encode()).unwrap();
            prop_assert_eq!(decoded, header);
        }
    }

    #[test]
    fn header_is_big_endian() {
        let header = MessageHeader::control(0x03, 0x0102_0304);
        assert_eq!(
            header.encode(),
            [MAGIC, PROTOCOL_VERSION, FLAG_CONTROL, 0x03, 0x01, 0x02, 0x03, 0x04]
        );
    }

    #[test]
    fn flag_helpers() {
        let header = MessageHeader::new(FLAG_CONTROL | FLAG_SERVER, 0, 0);
        assert!(header.is_control());
        assert!(header.is_server());
        assert_eq!(header.segment(), Segment::Unsegmented);

        let app = MessageHeader::application(1, 0).with_segment(Segment::Middle);
        assert!(!app.is_control());
        assert_eq!(app.segment(), Segment::Middle);
        assert_eq!(app.with_segment(Segment::Last).segment(), Segment::Last);
        assert_eq!(app.with_segment(Segment::First).flags, 0x10);
    }

    #[test]
    fn byte_order_bit_is_distinct() {
        let big = MessageHeader::new(FLAG_CONTROL | FLAG_BIG_ENDIAN, 2, 0);
        let little = MessageHeader::control(2, 0);
        assert!(big.is_control() && big.is_big_endian());
        assert!(!little.is_big_endian());
        assert_ne!(big.encode(), little.encode());
        assert_eq!(big.with_segment(Segment::Last).flags & FLAG_BIG_ENDIAN, FLAG_BIG_ENDIAN);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let payload = b"hello, pvwire!";

        encode_frame(0, 7, payload, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + payload.len());

        let frame = decode_frame(&mut buf, &FrameConfig::default())
            .unwrap()
            .unwrap();

        assert_eq!(frame.header.command, 7);
        assert!(!frame.header.is_control());
        assert_eq!(frame.payload.as_ref(), payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[MAGIC, PROTOCOL_VERSION, 0x00][..]);
        let result = decode_frame(&mut buf, &FrameConfig::default()).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(0, 1, b"hello", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);

        let result = decode_frame(&mut buf, &FrameConfig::default()).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 2);
    }

    #[test]
    fn test_decode_invalid_magic() {
        let mut buf = BytesMut::from(&[0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00][..]);
        let result = decode_frame(&mut buf, &FrameConfig::default());
        assert!(matches!(result, Err(FrameError::InvalidMagic { found: 0xFF })));
    }

    #[test]
    fn test_decode_negative_size() {
        let mut buf = BytesMut::new();
        MessageHeader::application(1, -1).put(&mut buf);
        let result = decode_frame(&mut buf, &FrameConfig::default());
        assert!(matches!(result, Err(FrameError::InvalidPayloadSize(-1))));
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        MessageHeader::application(1, 32 * 1024 * 1024).put(&mut buf);

        let result = decode_frame(&mut buf, &FrameConfig::default());
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn version_policy_controls_mismatch() {
        let header = MessageHeader {
            version: PROTOCOL_VERSION + 1,
            ..MessageHeader::application(1, 0)
        };

        assert_eq!(header.validate(&FrameConfig::default()).unwrap(), 0);

        let strict = FrameConfig {
            version_policy: VersionPolicy::Reject,
            ..FrameConfig::default()
        };
        assert!(matches!(
            header.validate(&strict),
            Err(FrameError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_multiple_frames() {
        let mut buf = BytesMut::new();
        encode_frame(FLAG_CONTROL, 0, b"", &mut buf).unwrap();
        encode_frame(0, 1, b"second", &mut buf).unwrap();

        let config = FrameConfig::default();
        let f1 = decode_frame(&mut buf, &config).unwrap().unwrap();
        assert!(f1.header.is_control());
        assert_eq!(f1.header.command, 0);
        assert!(f1.payload.is_empty());

        let f2 = decode_frame(&mut buf, &config).unwrap().unwrap();
        assert_eq!(f2.header.command, 1);
        assert_eq!(f2.payload.as_ref(), b"second");
        assert_eq!(f2.wire_size(), HEADER_SIZE + 6);

        assert!(buf.is_empty());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: FrameConfig = serde_json::from_str(r#"{"version_policy":"reject"}"#).unwrap();
        assert_eq!(config.version_policy, VersionPolicy::Reject);
        assert_eq!(config.max_payload_size, DEFAULT_MAX_PAYLOAD);
    }
}
