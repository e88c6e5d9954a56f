use serde::{Deserialize, Serialize};

/// Default number of events collected per wait.
pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;

/// Configuration for the readiness loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Maximum events handled per wait. Default: 1024.
    pub events_capacity: usize,
    /// Name of the loop thread started by `Poller::run`.
    pub thread_name: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            thread_name: "pvwire-poller".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config: PollerConfig = serde_json::from_str(r#"{"events_capacity": 64}"#).unwrap();
        assert_eq!(config.events_capacity, 64);
        assert_eq!(config.thread_name, "pvwire-poller");
    }
}
