//! Per-connection message codec.
//!
//! A [`Connection`] owns one socket. Its read side turns readiness events
//! into framed messages for a [`MessageHandler`]; its write side lets any
//! number of threads enqueue [`TransportSender`]s, which run one at a time
//! under the writer lock and write whole messages through [`SendControl`].
//! When the socket's send buffer fills up, the writing thread waits for
//! write readiness while still letting nested reads make progress.

pub mod cache;
pub mod config;
pub mod connection;
pub mod control;
pub mod error;
pub mod handler;
pub mod registration;
pub mod sender;
pub mod stats;

pub use cache::{SerializableField, SerializationCache};
pub use config::{
    CodecConfig, DatagramErrorPolicy, DEFAULT_RECEIVE_BUFFER_SIZE, DEFAULT_SEND_BUFFER_SIZE,
    MAX_DATAGRAM_SIZE,
};
pub use connection::{Connection, ConnectionState, WriteMode};
pub use control::{answer_echo, decode_total, ControlMessage};
pub use error::{CodecError, Result};
pub use handler::{Message, MessageHandler};
pub use registration::Registration;
pub use sender::{SendControl, TransportSender};
pub use stats::{ConnectionStats, StatsSnapshot};
