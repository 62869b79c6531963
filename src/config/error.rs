//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid URL for {0}")]
    InvalidUrl(&'static str),

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Reconnect base delay must be positive and not exceed the max delay")]
    InvalidBackoff,

    #[error("Heartbeat interval must be positive")]
    InvalidHeartbeat,

    #[error("Metrics max wait must not be shorter than the quiet window")]
    InvalidMetricsWindow,

    #[error("At least one value required for {0}")]
    EmptyList(&'static str),

    #[error("Unknown log level: {0}")]
    InvalidLogLevel(String),
}
