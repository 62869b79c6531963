//! Domain layer containing the realtime vocabulary and order snapshots.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (value objects, IDs, errors)
//! - `realtime` - Change events, channel scopes, connection states, backoff
//! - `orders` - Dashboard order snapshots, view filters, refetch sequencing

pub mod foundation;
pub mod orders;
pub mod realtime;
