use bytes::Bytes;
use pvwire_frame::command::{
    ACK_TOTAL_BYTES_RECEIVED, ECHO_REQUEST, ECHO_RESPONSE, MARK_TOTAL_BYTES_SENT, SET_BYTE_ORDER,
};
use pvwire_frame::{FLAG_BIG_ENDIAN, FLAG_CONTROL};

use crate::connection::Connection;
use crate::error::{CodecError, Result};
use crate::handler::Message;
use crate::sender::{SendControl, TransportSender};

/// A control message, ready to be enqueued as a sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub command: u8,
    pub payload: Bytes,
    /// Extra header flags, e.g. the byte order bit.
    pub flags: u8,
}

impl ControlMessage {
    pub fn new(command: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            payload: payload.into(),
            flags: 0,
        }
    }

    /// Liveness probe. The peer answers with the same payload.
    pub fn echo_request(payload: impl Into<Bytes>) -> Self {
        Self::new(ECHO_REQUEST, payload)
    }

    pub fn echo_response(payload: impl Into<Bytes>) -> Self {
        Self::new(ECHO_RESPONSE, payload)
    }

    /// Announce the byte order of the payloads that follow.
    pub fn set_byte_order(big_endian: bool) -> Self {
        let mut message = Self::new(SET_BYTE_ORDER, Bytes::new());
        if big_endian {
            message.flags = FLAG_BIG_ENDIAN;
        }
        message
    }

    pub fn mark_total_bytes_sent(total: u64) -> Self {
        Self::new(MARK_TOTAL_BYTES_SENT, total_payload(total))
    }

    pub fn ack_total_bytes_received(total: u64) -> Self {
        Self::new(ACK_TOTAL_BYTES_RECEIVED, total_payload(total))
    }
}

impl TransportSender for ControlMessage {
    fn send(&self, control: &mut SendControl<'_>) -> Result<()> {
        control.put_message(FLAG_CONTROL | self.flags, self.command, &self.payload)
    }
}

fn total_payload(total: u64) -> Bytes {
    Bytes::copy_from_slice(&total.to_be_bytes())
}

/// Read the byte counter carried by the flow-control commands.
pub fn decode_total(payload: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = payload
        .get(..8)
        .and_then(|head| <[u8; 8]>::try_from(head).ok())
        .ok_or_else(|| {
            CodecError::Handler(format!("byte counter needs 8 bytes, got {}", payload.len()))
        })?;
    Ok(u64::from_be_bytes(bytes))
}

/// Answer an `ECHO_REQUEST` with an `ECHO_RESPONSE` carrying the same bytes.
///
/// Returns `Ok(false)` for any other message.
pub fn answer_echo(connection: &Connection, message: &Message) -> Result<bool> {
    if !message.is_control() || message.command() != ECHO_REQUEST {
        return Ok(false);
    }
    let reply = ControlMessage::echo_response(message.payload.clone());
    connection.enqueue_send_request(std::sync::Arc::new(reply))?;
    Ok(true)
}
