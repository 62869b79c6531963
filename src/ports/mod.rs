//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the realtime engine and the outside world. Adapters implement these ports.
//!
//! ## Realtime Ports
//!
//! - `ChangeFeedTransport` - Opens backend channels and reports their signals
//! - `ChangeSubscriber` - Feature callbacks registered with the registry
//!
//! ## Data Ports
//!
//! - `OrderFetcher` - Scoped single-order and wholesale order queries

mod change_feed;
mod change_subscriber;
mod order_fetcher;

pub use change_feed::{
    ChangeFeedTransport, ChannelSpec, ChannelStatus, SignalKind, SignalSender, TableFilter,
    TransportError, TransportHandle, TransportSignal,
};
pub use change_subscriber::{ChangeSubscriber, Subscriber};
pub use order_fetcher::{FetchError, OrderFetcher};
