//! Adapters - Implementations of port interfaces.
//!
//! - `orders` - Order fetchers (PostgREST, in-memory)
//! - `realtime` - Change feed transports (Phoenix websocket, in-memory)

pub mod orders;
pub mod realtime;

pub use orders::{InMemoryOrderFetcher, PostgrestOrderFetcher, PostgrestSettings};
pub use realtime::{InMemoryTransport, OpenBehavior, PhoenixSettings, PhoenixTransport};
