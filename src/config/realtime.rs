//! Realtime channel configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::domain::realtime::BackoffPolicy;

/// Realtime channel and reconnection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Delay before the first reconnect, in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for reconnect delays, in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Reconnects attempted before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Time allowed for a channel to report SUBSCRIBED, in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Socket heartbeat interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Column carrying the branch id on branch-scoped tables
    #[serde(default = "default_branch_column")]
    pub branch_column: String,

    /// Prefix of channel topic names
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Tables that get a server-side branch filter (comma-separated)
    #[serde(default = "default_branch_scoped_tables")]
    pub branch_scoped_tables: String,
}

impl RealtimeConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.max_attempts,
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Get branch-scoped tables as a vector
    pub fn branch_scoped_tables_list(&self) -> Vec<String> {
        split_list(&self.branch_scoped_tables)
    }

    /// Validate realtime configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.base_delay_ms == 0 || self.base_delay_ms > self.max_delay_ms {
            return Err(ValidationError::InvalidBackoff);
        }
        if self.connect_timeout_ms == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ValidationError::InvalidHeartbeat);
        }
        if self.branch_column.trim().is_empty() {
            return Err(ValidationError::MissingRequired("REALTIME__BRANCH_COLUMN"));
        }
        if self.topic_prefix.trim().is_empty() {
            return Err(ValidationError::MissingRequired("REALTIME__TOPIC_PREFIX"));
        }
        Ok(())
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_attempts: default_max_attempts(),
            connect_timeout_ms: default_connect_timeout(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            branch_column: default_branch_column(),
            topic_prefix: default_topic_prefix(),
            branch_scoped_tables: default_branch_scoped_tables(),
        }
    }
}

pub(super) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_base_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_heartbeat_interval() -> u64 {
    25
}

fn default_branch_column() -> String {
    "branch_id".to_string()
}

fn default_topic_prefix() -> String {
    "orders".to_string()
}

fn default_branch_scoped_tables() -> String {
    "orders".to_string()
}
