//! Realtime engine - registry, per-channel drivers and fan-out.
//!
//! ## Components
//!
//! - `SubscriptionRegistry` - subscribe/unsubscribe, one channel per branch
//! - `ChannelDriver` - reconnection controller and dispatch loop per channel
//! - `SubscriberIndex` - table-keyed fan-out with branch guard and isolation

mod driver;
mod registry;
mod router;

pub use driver::ChannelSettings;
pub use registry::{Subscription, SubscriptionRegistry};
pub use router::{DeliveryReport, SubscriberIndex};
