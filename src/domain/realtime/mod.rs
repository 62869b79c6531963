//! Realtime module - change events and channel lifecycle vocabulary.

mod backoff;
mod change_event;
mod connection;
mod errors;

pub use backoff::BackoffPolicy;
pub use change_event::{ChangeEvent, Operation, Row};
pub use connection::{ChannelScope, ChannelSnapshot, ConnectionBadge, ConnectionState};
pub use errors::RealtimeError;
