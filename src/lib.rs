//! Order Desk - realtime reconciliation for restaurant order dashboards.
//!
//! Keeps an in-memory order book consistent with the backend's change feed:
//! one shared channel per branch, per-subscriber fan-out with failure
//! isolation, reconnection with capped exponential backoff, and a reconciler
//! that patches, refetches or removes orders as change events arrive.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;
