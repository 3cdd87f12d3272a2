//! Dispatch service configuration.

use herald_store::DEFAULT_MAX_RETRIES;
use serde::{Deserialize, Serialize};

fn default_smtp_host() -> String {
    "localhost".to_string()
}

const fn default_smtp_port() -> u16 {
    25
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Configuration for a [`crate::DispatchService`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// SMTP relay host.
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    /// SMTP relay port.
    ///
    /// Default: 25
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// How often the scheduler fires the dispatcher, in minutes.
    ///
    /// `None` leaves periodic processing unscheduled; the embedder either
    /// calls `schedule_process` itself or drives `process_queue` manually.
    #[serde(default)]
    pub interval_minutes: Option<u64>,

    /// Retry budget applied to requests posted without an explicit one.
    ///
    /// Default: 3
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            interval_minutes: None,
            default_max_retries: default_max_retries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.smtp_host, "localhost");
        assert_eq!(config.smtp_port, 25);
        assert_eq!(config.interval_minutes, None);
        assert_eq!(config.default_max_retries, 3);
    }
}
