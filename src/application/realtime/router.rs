//! Per-channel subscriber index and event fan-out.

use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use crate::domain::foundation::SubscriberId;
use crate::domain::realtime::{ChangeEvent, RealtimeError};
use crate::ports::Subscriber;

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Subscribers whose handler completed successfully.
    pub delivered: usize,
    /// Subscribers skipped because the row belongs to another branch.
    pub rejected: usize,
    /// Subscribers whose handler returned an error or panicked.
    pub failed: usize,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Subscribers of one channel, grouped by table.
///
/// Owned by the channel's driver task, which is the only place events are
/// dispatched from, so membership changes never interleave with delivery.
pub struct SubscriberIndex {
    by_table: HashMap<String, Vec<Subscriber>>,
    branch_column: String,
}

impl SubscriberIndex {
    pub fn new(branch_column: impl Into<String>) -> Self {
        Self {
            by_table: HashMap::new(),
            branch_column: branch_column.into(),
        }
    }

    pub fn insert(&mut self, subscriber: Subscriber) {
        self.by_table
            .entry(subscriber.table.clone())
            .or_default()
            .push(subscriber);
    }

    pub fn remove(&mut self, id: SubscriberId) -> Option<Subscriber> {
        let mut removed = None;
        self.by_table.retain(|_, subscribers| {
            if let Some(pos) = subscribers.iter().position(|s| s.id == id) {
                removed = Some(subscribers.remove(pos));
            }
            !subscribers.is_empty()
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.by_table.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_table.is_empty()
    }

    pub fn for_table(&self, table: &str) -> &[Subscriber] {
        self.by_table.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Delivers `event` to every subscriber of its table, in registration order.
    pub async fn dispatch(&self, event: &ChangeEvent) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let row_branch = event.branch(&self.branch_column);

        for subscriber in self.for_table(event.table()) {
            if let (Some(wanted), Some(actual)) = (&subscriber.branch_filter, &row_branch) {
                if wanted != actual {
                    tracing::debug!(
                        subscriber = %subscriber.id,
                        wanted = %wanted,
                        actual = %actual,
                        "Branch guard rejected event"
                    );
                    report.rejected += 1;
                    continue;
                }
            }

            let outcome = AssertUnwindSafe(subscriber.handler.on_event(event))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    let error = RealtimeError::SubscriberCallback {
                        id: subscriber.id,
                        name: subscriber.name().to_string(),
                        message: e.to_string(),
                    };
                    tracing::warn!(table = event.table(), "{}", error);
                }
                Err(panic) => {
                    report.failed += 1;
                    let error = RealtimeError::SubscriberCallback {
                        id: subscriber.id,
                        name: subscriber.name().to_string(),
                        message: format!("panicked: {}", panic_message(&*panic)),
                    };
                    tracing::error!(table = event.table(), "{}", error);
                }
            }
        }

        report
    }

    /// Hands `error` to every subscriber's `on_error`, isolating panics.
    pub async fn notify_error(&self, error: &RealtimeError) {
        for subscriber in self.by_table.values().flatten() {
            let outcome = AssertUnwindSafe(subscriber.handler.on_error(error))
                .catch_unwind()
                .await;
            if let Err(panic) = outcome {
                tracing::error!(
                    subscriber = %subscriber.id,
                    name = subscriber.name(),
                    "on_error panicked: {}",
                    panic_message(&*panic)
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{BranchId, DomainError, ErrorCode};
    use crate::domain::realtime::Row;
    use crate::ports::ChangeSubscriber;
    use async_trait::async_trait;
    use serde_json::{json, Value as JsonValue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counting {
        events: AtomicUsize,
        errors: AtomicUsize,
    }

    #[async_trait]
    impl ChangeSubscriber for Counting {
        async fn on_event(&self, _event: &ChangeEvent) -> Result<(), DomainError> {
            self.events.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_error(&self, _error: &RealtimeError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn name(&self) -> &'static str {
            "Counting"
        }
    }

    struct Failing;

    #[async_trait]
    impl ChangeSubscriber for Failing {
        async fn on_event(&self, _event: &ChangeEvent) -> Result<(), DomainError> {
            Err(DomainError::new(ErrorCode::SubscriberFailed, "boom"))
        }

        fn name(&self) -> &'static str {
            "Failing"
        }
    }

    struct Panicking;

    #[async_trait]
    impl ChangeSubscriber for Panicking {
        async fn on_event(&self, _event: &ChangeEvent) -> Result<(), DomainError> {
            panic!("handler bug");
        }

        fn name(&self) -> &'static str {
            "Panicking"
        }
    }

    fn row(value: JsonValue) -> Row {
        value.as_object().cloned().unwrap_or_default()
    }

    fn branch(id: &str) -> BranchId {
        BranchId::new(id).unwrap()
    }

    #[tokio::test]
    async fn dispatch_reaches_every_subscriber_of_the_table() {
        let mut index = SubscriberIndex::new("branch_id");
        let handlers: Vec<Arc<Counting>> = (0..3).map(|_| Arc::new(Counting::default())).collect();
        for handler in &handlers {
            index.insert(Subscriber::new("orders", None, handler.clone()));
        }
        let other = Arc::new(Counting::default());
        index.insert(Subscriber::new("order_line_items", None, other.clone()));

        let report = index
            .dispatch(&ChangeEvent::insert("orders", row(json!({"id": 1}))))
            .await;

        assert_eq!(report.delivered, 3);
        for handler in &handlers {
            assert_eq!(handler.events.load(Ordering::SeqCst), 1);
        }
        assert_eq!(other.events.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_and_panicking_subscribers_are_isolated() {
        let mut index = SubscriberIndex::new("branch_id");
        let healthy = Arc::new(Counting::default());
        index.insert(Subscriber::new("orders", None, Arc::new(Failing)));
        index.insert(Subscriber::new("orders", None, Arc::new(Panicking)));
        index.insert(Subscriber::new("orders", None, healthy.clone()));

        let report = index
            .dispatch(&ChangeEvent::insert("orders", row(json!({"id": 1}))))
            .await;

        assert_eq!(report.failed, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(healthy.events.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn branch_guard_rejects_rows_of_other_branches() {
        let mut index = SubscriberIndex::new("branch_id");
        let scoped = Arc::new(Counting::default());
        index.insert(Subscriber::new("orders", Some(branch("B1")), scoped.clone()));

        let foreign = index
            .dispatch(&ChangeEvent::insert(
                "orders",
                row(json!({"id": 1, "branch_id": "B2"})),
            ))
            .await;
        let unbranded = index
            .dispatch(&ChangeEvent::insert("orders", row(json!({"id": 2}))))
            .await;

        assert_eq!(foreign.rejected, 1);
        assert_eq!(unbranded.delivered, 1);
        assert_eq!(scoped.events.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn removed_subscriber_stops_receiving() {
        let mut index = SubscriberIndex::new("branch_id");
        let handler = Arc::new(Counting::default());
        let subscriber = Subscriber::new("orders", None, handler.clone());
        let id = subscriber.id;
        index.insert(subscriber);

        assert!(index.remove(id).is_some());
        assert!(index.remove(id).is_none());
        assert!(index.is_empty());

        let report = index
            .dispatch(&ChangeEvent::insert("orders", row(json!({"id": 1}))))
            .await;
        assert_eq!(report.attempted(), 0);
    }

    #[tokio::test]
    async fn notify_error_reaches_all_tables() {
        let mut index = SubscriberIndex::new("branch_id");
        let a = Arc::new(Counting::default());
        let b = Arc::new(Counting::default());
        index.insert(Subscriber::new("orders", None, a.clone()));
        index.insert(Subscriber::new("order_line_items", None, b.clone()));

        index.notify_error(&RealtimeError::RegistryClosed).await;

        assert_eq!(a.errors.load(Ordering::SeqCst), 1);
        assert_eq!(b.errors.load(Ordering::SeqCst), 1);
        assert_eq!(index.len(), 2);
    }
}
