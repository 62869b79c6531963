//! In-memory order fetcher for tests.
//!
//! Serves whatever the test stored with `put`. Fetches can be delayed or held
//! on a gate so tests can interleave them with change events.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::domain::foundation::OrderId;
use crate::domain::orders::{OrderRecord, ViewFilter};
use crate::ports::{FetchError, OrderFetcher};

pub struct InMemoryOrderFetcher {
    orders: Mutex<HashMap<OrderId, OrderRecord>>,
    branch_column: String,
    fetch_count: AtomicUsize,
    list_count: AtomicUsize,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl InMemoryOrderFetcher {
    pub fn new(branch_column: impl Into<String>) -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
            branch_column: branch_column.into(),
            fetch_count: AtomicUsize::new(0),
            list_count: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay: Mutex::new(None),
            gate: Mutex::new(None),
        }
    }

    fn orders(&self) -> MutexGuard<'_, HashMap<OrderId, OrderRecord>> {
        self.orders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put(&self, record: OrderRecord) {
        self.orders().insert(record.id().clone(), record);
    }

    pub fn remove(&self, id: &OrderId) {
        self.orders().remove(id);
    }

    /// Number of single-order fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn list_count(&self) -> usize {
        self.list_count.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every fetch sleeps this long before reading the store.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Holds single-order fetches until `release` hands out permits.
    pub fn hold(&self) {
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::new(Semaphore::new(0)));
    }

    /// Lets `count` held fetches through.
    pub fn release(&self, count: usize) {
        if let Some(gate) = self.gate.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            gate.add_permits(count);
        }
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl OrderFetcher for InMemoryOrderFetcher {
    async fn fetch_order(&self, id: &OrderId) -> Result<Option<OrderRecord>, FetchError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);

        let gate = self
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.pause().await;

        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Network("fetcher offline".into()));
        }
        Ok(self.orders().get(id).cloned())
    }

    async fn fetch_orders(&self, view: &ViewFilter) -> Result<Vec<OrderRecord>, FetchError> {
        self.list_count.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Network("fetcher offline".into()));
        }
        Ok(self
            .orders()
            .values()
            .filter(|record| view.matches(record, &self.branch_column))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order(id: i64, branch: &str) -> OrderRecord {
        let row = json!({"id": id, "branch_id": branch, "status": "new"});
        OrderRecord::from_row(row.as_object().unwrap().clone()).unwrap()
    }

    #[tokio::test]
    async fn serves_stored_orders() {
        let fetcher = InMemoryOrderFetcher::new("branch_id");
        fetcher.put(order(1, "B1"));

        let id = OrderId::new("1").unwrap();
        assert!(fetcher.fetch_order(&id).await.unwrap().is_some());
        fetcher.remove(&id);
        assert!(fetcher.fetch_order(&id).await.unwrap().is_none());
        assert_eq!(fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn listing_applies_the_view() {
        let fetcher = InMemoryOrderFetcher::new("branch_id");
        fetcher.put(order(1, "B1"));
        fetcher.put(order(2, "B2"));

        let view = ViewFilter::all().for_branch(crate::domain::foundation::BranchId::new("B2").unwrap());
        let listed = fetcher.fetch_orders(&view).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id().as_str(), "2");
    }

    #[tokio::test]
    async fn failing_fetcher_reports_network_error() {
        let fetcher = InMemoryOrderFetcher::new("branch_id");
        fetcher.set_failing(true);
        let result = fetcher.fetch_order(&OrderId::new("1").unwrap()).await;
        assert!(matches!(result, Err(FetchError::Network(_))));
    }
}
