//! Change feed transport adapters.

mod in_memory;
pub mod phoenix;

pub use in_memory::{InMemoryTransport, OpenBehavior};
pub use phoenix::{PhoenixSettings, PhoenixTransport};
