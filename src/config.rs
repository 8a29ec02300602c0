use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for a [`crate::Worker`] that can be loaded with any serde format.
///
/// ```rust ignore
/// let config: WorkerConfig = serde_json::from_str(r#"{ "limit": 8, "timeout_ms": 30000 }"#)?;
/// let worker = Worker::builder(work).config(&config).build();
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum number of tasks running at once. Zero is treated as one.
    pub limit: usize,
    /// Cancel the whole run with [`crate::Error::DeadlineExceeded`] after this many milliseconds.
    pub timeout_ms: Option<u64>,
}

impl WorkerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for WorkerConfig {
    fn default() -> WorkerConfig {
        WorkerConfig {
            limit: 1,
            timeout_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: WorkerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.limit, 1);
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_deserialize() {
        let config: WorkerConfig =
            serde_json::from_str(r#"{ "limit": 8, "timeout_ms": 250 }"#).unwrap();
        assert_eq!(config.limit, 8);
        assert_eq!(config.timeout(), Some(Duration::from_millis(250)));
    }
}
