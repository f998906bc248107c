//! Stage poller configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the stage poller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Enable/disable the poller.
    /// When disabled, sessions stay in their trigger status until another
    /// worker sharing the database claims them.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How often each stage loop looks for sessions to claim (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum stage handlers running at once, across all stages (0 = unlimited).
    /// Sessions beyond the limit stay in their trigger status.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_handlers: usize,

    /// Extra time past a stage's timeout before an in-progress claim is
    /// considered orphaned and failed (seconds).
    #[serde(default = "default_stale_grace")]
    pub stale_grace_secs: u64,

    /// How long `stop()` waits for running handlers (milliseconds).
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    2000 // 2 seconds
}

fn default_max_concurrent() -> usize {
    4
}

fn default_stale_grace() -> u64 {
    300 // 5 minutes
}

fn default_shutdown_grace() -> u64 {
    5000
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_ms: default_poll_interval(),
            max_concurrent_handlers: default_max_concurrent(),
            stale_grace_secs: default_stale_grace(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}
