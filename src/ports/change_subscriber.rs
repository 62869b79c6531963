//! ChangeSubscriber port - What features hand to the subscription registry.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::domain::foundation::{BranchId, DomainError, SubscriberId};
use crate::domain::realtime::{ChangeEvent, RealtimeError};

/// Callbacks for a feature interested in one table.
///
/// Implementations should be quick: events for a channel are dispatched one
/// at a time, so a slow handler delays every subscriber of that channel.
/// Errors and panics are caught and logged by the router.
///
/// Callbacks run on the channel's driver task. Awaiting `unsubscribe` for a
/// subscriber of the same channel from inside a callback deadlocks it.
///
/// # Example
///
/// ```ignore
/// struct Ticker;
///
/// #[async_trait]
/// impl ChangeSubscriber for Ticker {
///     async fn on_event(&self, event: &ChangeEvent) -> Result<(), DomainError> {
///         tracing::info!(table = event.table(), "tick");
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str {
///         "Ticker"
///     }
/// }
/// ```
#[async_trait]
pub trait ChangeSubscriber: Send + Sync {
    async fn on_event(&self, event: &ChangeEvent) -> Result<(), DomainError>;

    /// Called when the channel gave up reconnecting.
    async fn on_error(&self, _error: &RealtimeError) {}

    /// Subscriber name for logging.
    fn name(&self) -> &'static str;
}

/// A registered interest: one table, optionally one branch.
#[derive(Clone)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub table: String,
    pub branch_filter: Option<BranchId>,
    pub handler: Arc<dyn ChangeSubscriber>,
}

impl Subscriber {
    /// Creates a subscriber with a fresh id.
    pub fn new(
        table: impl Into<String>,
        branch_filter: Option<BranchId>,
        handler: Arc<dyn ChangeSubscriber>,
    ) -> Self {
        Self {
            id: SubscriberId::new(),
            table: table.into(),
            branch_filter,
            handler,
        }
    }

    pub fn name(&self) -> &'static str {
        self.handler.name()
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("table", &self.table)
            .field("branch_filter", &self.branch_filter)
            .field("handler", &self.handler.name())
            .finish()
    }
}
