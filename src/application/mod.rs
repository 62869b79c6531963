//! Application layer - the realtime engine and its consumers.
//!
//! The realtime engine owns channels and fans events out; consumers are thin
//! `ChangeSubscriber` implementations that keep their own state.

pub mod dashboard;
pub mod metrics;
pub mod realtime;

pub use dashboard::{DashboardReconciler, DashboardSettings};
pub use metrics::{MetricsRefresh, MetricsRefreshTrigger};
pub use realtime::{ChannelSettings, DeliveryReport, Subscription, SubscriptionRegistry};
