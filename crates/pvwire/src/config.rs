use std::path::{Path, PathBuf};

use pvwire_codec::CodecConfig;
use pvwire_poller::PollerConfig;
use serde::{Deserialize, Serialize};

use crate::logging::{LogFormat, LogLevel};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Everything needed to stand up a poller and its connections.
///
/// Missing sections and fields take their defaults, so `{}` is a valid
/// config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub poller: PollerConfig,
    pub codec: CodecConfig,
    pub log_format: LogFormat,
    pub log_level: LogLevel,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Install the configured log subscriber.
    pub fn init_logging(&self) {
        crate::logging::init_logging(self.log_format, self.log_level);
    }
}
