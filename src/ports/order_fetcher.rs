//! OrderFetcher port - Point queries against the relational REST API.

use async_trait::async_trait;

use crate::domain::foundation::OrderId;
use crate::domain::orders::{OrderRecord, ViewFilter};

/// Errors that can occur while fetching orders.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("backend responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode response: {0}")]
    Decode(String),
}

/// Port for loading authoritative order rows.
#[async_trait]
pub trait OrderFetcher: Send + Sync {
    /// Loads one order with its line items and join-derived fields.
    ///
    /// `Ok(None)` means the order is gone or no longer visible to the caller.
    async fn fetch_order(&self, id: &OrderId) -> Result<Option<OrderRecord>, FetchError>;

    /// Loads every order matching `view`, used for wholesale reloads.
    async fn fetch_orders(&self, view: &ViewFilter) -> Result<Vec<OrderRecord>, FetchError>;
}
