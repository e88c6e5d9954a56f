use std::time::Duration;

use pvwire_frame::FrameConfig;
use serde::{Deserialize, Serialize};

/// Default receive chunk size: 16 KiB.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 16 * 1024;

/// Default soft limit of the send buffer: 16 KiB.
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 16 * 1024;

/// Largest datagram the read path is prepared to receive.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// What to do with a datagram that fails header validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatagramErrorPolicy {
    /// Drop the rest of the datagram and keep the connection open.
    #[default]
    Discard,
    /// Close the connection, as for streams.
    Close,
}

/// Configuration for a [`Connection`](crate::Connection).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Header validation limits.
    pub frame: FrameConfig,
    /// Bytes requested from the socket per read.
    pub receive_buffer_size: usize,
    /// Soft limit of the send buffer. `0` uses the kernel send buffer size.
    pub send_buffer_size: usize,
    /// How long a blocked writer waits for write readiness per attempt.
    #[serde(with = "duration_ms")]
    pub send_poll_interval: Duration,
    /// A write that makes no progress for this long fails the connection.
    #[serde(with = "duration_ms")]
    pub send_timeout: Duration,
    pub datagram_error_policy: DatagramErrorPolicy,
    /// Reuse encodings of `SerializableField`s across messages.
    pub serialization_cache: bool,
    /// Mark outgoing headers as sent by a server.
    pub server: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
            send_poll_interval: Duration::from_millis(100),
            send_timeout: Duration::from_secs(30),
            datagram_error_policy: DatagramErrorPolicy::default(),
            serialization_cache: false,
            server: false,
        }
    }
}

/// Serde adapter storing a `Duration` as whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_are_milliseconds() {
        let config: CodecConfig = serde_json::from_str(
            r#"{"send_poll_interval": 5, "send_timeout": 2500, "datagram_error_policy": "close"}"#,
        )
        .unwrap();

        assert_eq!(config.send_poll_interval, Duration::from_millis(5));
        assert_eq!(config.send_timeout, Duration::from_millis(2500));
        assert_eq!(config.datagram_error_policy, DatagramErrorPolicy::Close);
        assert_eq!(config.send_buffer_size, DEFAULT_SEND_BUFFER_SIZE);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["send_timeout"], 2500);
    }

    #[test]
    fn defaults() {
        let config = CodecConfig::default();
        assert_eq!(config.datagram_error_policy, DatagramErrorPolicy::Discard);
        assert!(!config.serialization_cache);
        assert_eq!(config.send_timeout, Duration::from_secs(30));
    }
}
