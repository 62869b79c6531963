//! Metrics page consumer.

mod refresh_trigger;

pub use refresh_trigger::{MetricsRefresh, MetricsRefreshTrigger};
