//! DashboardReconciler - merges routed order events into an order book.
//!
//! ## Merge rules
//!
//! | Event | Action |
//! |-------|--------|
//! | order INSERT | add when inside the view |
//! | order UPDATE, known order | patch tracked columns, or mark stale and refetch |
//! | order UPDATE, unknown order | refetch when the new row enters the view |
//! | order DELETE | remove and invalidate in-flight refetches |
//! | line item INSERT/UPDATE/DELETE | refetch the parent order |
//!
//! Refetches for one order coalesce: requests arriving during the coalescing
//! window or while a fetch is in flight collapse into one follow-up fetch.
//! Every fetch carries a sequence ticket, and a result is only applied when
//! its ticket is still the latest one issued for that order. An INSERT or a
//! patch applied in place supersedes the ticket of a fetch already in flight,
//! and that fetch is followed by one more.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::AbortHandle;

use crate::application::realtime::{Subscription, SubscriptionRegistry};
use crate::config::AppConfig;
use crate::domain::foundation::{DomainError, OrderId};
use crate::domain::orders::{
    OrderBook, OrderFieldPolicy, OrderRecord, RefetchOutcome, RefetchTicket, UpdatePlan,
    ViewFilter, ID_COLUMN,
};
use crate::domain::realtime::{ChangeEvent, Operation, RealtimeError};
use crate::ports::{ChangeSubscriber, FetchError, OrderFetcher, Subscriber};

/// Table names and timing used by the reconciler.
#[derive(Debug, Clone)]
pub struct DashboardSettings {
    pub orders_table: String,
    pub line_item_tables: HashSet<String>,
    /// Column on line-item rows naming their order.
    pub parent_column: String,
    pub branch_column: String,
    pub coalesce_window: Duration,
    pub field_policy: OrderFieldPolicy,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            orders_table: "orders".to_string(),
            line_item_tables: HashSet::from(["order_line_items".to_string()]),
            parent_column: "order_id".to_string(),
            branch_column: "branch_id".to_string(),
            coalesce_window: Duration::from_millis(250),
            field_policy: OrderFieldPolicy::default(),
        }
    }
}

impl From<&AppConfig> for DashboardSettings {
    fn from(config: &AppConfig) -> Self {
        let dashboard = &config.dashboard;
        Self {
            orders_table: dashboard.orders_table.clone(),
            line_item_tables: dashboard.line_item_tables_list().into_iter().collect(),
            parent_column: dashboard.parent_column.clone(),
            branch_column: config.realtime.branch_column.clone(),
            coalesce_window: dashboard.coalesce_window(),
            field_policy: OrderFieldPolicy::new(dashboard.join_keys_list()),
        }
    }
}

struct RefetchSlot {
    in_flight: bool,
    rerun: bool,
    task: AbortHandle,
}

struct ReconcilerState {
    book: OrderBook,
    view: ViewFilter,
    refetches: HashMap<OrderId, RefetchSlot>,
    last_error: Option<RealtimeError>,
    closed: bool,
}

struct ReconcilerInner {
    settings: DashboardSettings,
    fetcher: Arc<dyn OrderFetcher>,
    state: Mutex<ReconcilerState>,
    revisions: watch::Sender<u64>,
}

/// In-memory dashboard state fed by the realtime registry.
///
/// Cheap to clone; clones share the same order book.
#[derive(Clone)]
pub struct DashboardReconciler {
    inner: Arc<ReconcilerInner>,
}

impl DashboardReconciler {
    pub fn new(fetcher: Arc<dyn OrderFetcher>, settings: DashboardSettings, view: ViewFilter) -> Self {
        let (revisions, _) = watch::channel(0);
        Self {
            inner: Arc::new(ReconcilerInner {
                settings,
                fetcher,
                state: Mutex::new(ReconcilerState {
                    book: OrderBook::new(),
                    view,
                    refetches: HashMap::new(),
                    last_error: None,
                    closed: false,
                }),
                revisions,
            }),
        }
    }

    /// One subscriber per table the dashboard listens to, scoped to the view's branch.
    pub async fn subscribers(&self) -> Vec<Subscriber> {
        let branch = self.inner.state.lock().await.view.branch.clone();
        let handler: Arc<dyn ChangeSubscriber> = Arc::new(self.clone());

        let mut tables: Vec<&String> = self.inner.settings.line_item_tables.iter().collect();
        tables.sort();
        std::iter::once(&self.inner.settings.orders_table)
            .chain(tables)
            .map(|table| Subscriber::new(table.clone(), branch.clone(), handler.clone()))
            .collect()
    }

    /// Subscribes every table to `registry`.
    pub async fn attach(
        &self,
        registry: &SubscriptionRegistry,
    ) -> Result<Vec<Subscription>, RealtimeError> {
        let mut subscriptions = Vec::new();
        for subscriber in self.subscribers().await {
            match registry.subscribe(subscriber).await {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => {
                    for subscription in &subscriptions {
                        subscription.unsubscribe().await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(subscriptions)
    }

    /// Replaces the whole book, keeping only orders inside the view.
    pub async fn replace_all(&self, records: Vec<OrderRecord>) {
        let mut state = self.inner.state.lock().await;
        let view = state.view.clone();
        let branch_column = &self.inner.settings.branch_column;
        state.book.replace_all(
            records
                .into_iter()
                .filter(|record| view.matches(record, branch_column)),
        );
        self.publish(&state);
    }

    /// Loads the view wholesale through the fetcher.
    pub async fn reload(&self) -> Result<usize, FetchError> {
        let view = self.inner.state.lock().await.view.clone();
        let records = self.inner.fetcher.fetch_orders(&view).await?;
        let count = records.len();
        self.replace_all(records).await;
        tracing::info!(orders = count, "Dashboard reloaded");
        Ok(count)
    }

    /// Switches the view; returns how many orders were pruned.
    pub async fn set_view(&self, view: ViewFilter) -> usize {
        let mut state = self.inner.state.lock().await;
        let branch_column = self.inner.settings.branch_column.clone();
        let removed = state.book.retain(|record| view.matches(record, &branch_column));
        state.view = view;
        self.publish(&state);
        removed
    }

    pub async fn view(&self) -> ViewFilter {
        self.inner.state.lock().await.view.clone()
    }

    /// Orders newest first.
    pub async fn orders(&self) -> Vec<OrderRecord> {
        self.inner.state.lock().await.book.sorted()
    }

    pub async fn get(&self, id: &OrderId) -> Option<OrderRecord> {
        self.inner.state.lock().await.book.get(id).cloned()
    }

    pub async fn pending_refetches(&self) -> usize {
        self.inner.state.lock().await.refetches.len()
    }

    /// Refetch tickets issued but not yet applied, released or superseded.
    pub async fn outstanding_tickets(&self) -> usize {
        self.inner.state.lock().await.book.outstanding_tickets()
    }

    /// The terminal realtime error received, if live updates stopped.
    pub async fn last_error(&self) -> Option<RealtimeError> {
        self.inner.state.lock().await.last_error.clone()
    }

    /// Observer that ticks whenever the book changes.
    pub fn watch_revisions(&self) -> watch::Receiver<u64> {
        self.inner.revisions.subscribe()
    }

    /// Issues a refetch ticket for `id`, superseding earlier ones.
    pub async fn begin_refetch(&self, id: &OrderId) -> RefetchTicket {
        self.inner.state.lock().await.book.issue(id)
    }

    /// Applies a fetched row if `ticket` is still the latest for its order.
    pub async fn apply_refetch(
        &self,
        ticket: &RefetchTicket,
        fetched: Option<OrderRecord>,
    ) -> RefetchOutcome {
        let mut state = self.inner.state.lock().await;
        let view = state.view.clone();
        let outcome = state
            .book
            .apply(ticket, fetched, &view, &self.inner.settings.branch_column);
        if outcome == RefetchOutcome::Discarded {
            tracing::debug!(order_id = %ticket.order_id, seq = ticket.seq, "Stale refetch result discarded");
        } else {
            self.publish(&state);
        }
        outcome
    }

    /// Fetches one order immediately, bypassing the coalescing window.
    pub async fn refresh_order(&self, id: &OrderId) -> Result<RefetchOutcome, FetchError> {
        let ticket = self.begin_refetch(id).await;
        match self.inner.fetcher.fetch_order(id).await {
            Ok(fetched) => Ok(self.apply_refetch(&ticket, fetched).await),
            Err(e) => {
                self.inner.state.lock().await.book.release(&ticket);
                Err(e)
            }
        }
    }

    /// Aborts pending refetches; later events are ignored.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        state.closed = true;
        for (_, slot) in state.refetches.drain() {
            slot.task.abort();
        }
    }

    async fn apply_event(&self, event: &ChangeEvent) -> Result<(), DomainError> {
        let settings = &self.inner.settings;
        if event.table() == settings.orders_table {
            self.apply_order_event(event).await
        } else if settings.line_item_tables.contains(event.table()) {
            let parent = event
                .column(&settings.parent_column)
                .and_then(OrderId::from_json)
                .ok_or_else(|| {
                    DomainError::malformed_row(event.table(), "line item without parent order")
                })?;
            let mut state = self.inner.state.lock().await;
            if state.book.mark_stale(&parent) {
                self.publish(&state);
            }
            self.schedule_refetch(&mut state, parent);
            Ok(())
        } else {
            Ok(())
        }
    }

    async fn apply_order_event(&self, event: &ChangeEvent) -> Result<(), DomainError> {
        let settings = &self.inner.settings;
        let branch_column = settings.branch_column.as_str();
        let id = event
            .column(ID_COLUMN)
            .and_then(OrderId::from_json)
            .ok_or_else(|| DomainError::malformed_row(event.table(), "order event without id"))?;

        let mut state = self.inner.state.lock().await;
        match event.operation() {
            Operation::Insert => {
                let after = event.after().cloned().unwrap_or_default();
                let record = OrderRecord::from_row(after)?;
                if state.view.matches(&record, branch_column) {
                    state.book.upsert(record);
                    self.supersede_refetch(&mut state, &id);
                    self.publish(&state);
                }
            }
            Operation::Update => {
                let Some(current) = state.book.get(&id).cloned() else {
                    let after = event.after().cloned().unwrap_or_default();
                    let candidate = OrderRecord::from_row(after)?;
                    if state.view.matches(&candidate, branch_column) {
                        tracing::debug!(order_id = %id, "Order entered the view");
                        self.schedule_refetch(&mut state, id);
                    }
                    return Ok(());
                };

                match settings.field_policy.classify(&current, event) {
                    UpdatePlan::Unchanged => {}
                    UpdatePlan::Patch(fields) => {
                        let after = event.after().cloned().unwrap_or_default();
                        let mut candidate = current;
                        candidate.patch(&after, &fields);
                        if state.view.matches(&candidate, branch_column) {
                            state.book.patch(&id, &after, &fields);
                            self.supersede_refetch(&mut state, &id);
                        } else {
                            tracing::debug!(order_id = %id, "Order left the view");
                            self.forget(&mut state, &id);
                        }
                        self.publish(&state);
                    }
                    UpdatePlan::Refetch(reason) => {
                        tracing::debug!(order_id = %id, reason = %reason, "Update needs refetch");
                        state.book.mark_stale(&id);
                        self.publish(&state);
                        self.schedule_refetch(&mut state, id);
                    }
                }
            }
            Operation::Delete => {
                self.forget(&mut state, &id);
                self.publish(&state);
            }
        }
        Ok(())
    }

    /// Removes an order and cancels anything in flight for it.
    fn forget(&self, state: &mut ReconcilerState, id: &OrderId) {
        state.book.remove(id);
        state.book.invalidate(id);
        if let Some(slot) = state.refetches.remove(id) {
            slot.task.abort();
        }
    }

    /// Discards the result of any fetch in flight for `id` and queues a follow-up.
    fn supersede_refetch(&self, state: &mut ReconcilerState, id: &OrderId) {
        state.book.invalidate(id);
        if let Some(slot) = state.refetches.get_mut(id) {
            if slot.in_flight {
                slot.rerun = true;
            }
        }
    }

    fn schedule_refetch(&self, state: &mut ReconcilerState, id: OrderId) {
        if state.closed {
            return;
        }
        if let Some(slot) = state.refetches.get_mut(&id) {
            if slot.in_flight {
                slot.rerun = true;
            }
            return;
        }

        let task = tokio::spawn(run_refetch(self.inner.clone(), id.clone()));
        state.refetches.insert(
            id,
            RefetchSlot {
                in_flight: false,
                rerun: false,
                task: task.abort_handle(),
            },
        );
    }

    fn publish(&self, state: &ReconcilerState) {
        self.inner.revisions.send_replace(state.book.revision());
    }
}

async fn run_refetch(inner: Arc<ReconcilerInner>, id: OrderId) {
    loop {
        tokio::time::sleep(inner.settings.coalesce_window).await;

        let ticket = {
            let mut state = inner.state.lock().await;
            if state.closed {
                return;
            }
            let Some(slot) = state.refetches.get_mut(&id) else {
                return;
            };
            slot.in_flight = true;
            slot.rerun = false;
            state.book.issue(&id)
        };

        let fetched = inner.fetcher.fetch_order(&id).await;

        let mut state = inner.state.lock().await;
        match fetched {
            Ok(record) => {
                let view = state.view.clone();
                let outcome = state
                    .book
                    .apply(&ticket, record, &view, &inner.settings.branch_column);
                tracing::debug!(order_id = %id, seq = ticket.seq, outcome = ?outcome, "Scoped refetch finished");
                if outcome != RefetchOutcome::Discarded {
                    inner.revisions.send_replace(state.book.revision());
                }
            }
            Err(e) => {
                state.book.release(&ticket);
                tracing::warn!(order_id = %id, error = %e, "Scoped refetch failed; order stays stale");
            }
        }

        match state.refetches.get_mut(&id) {
            Some(slot) if slot.rerun => slot.in_flight = false,
            _ => {
                state.refetches.remove(&id);
                return;
            }
        }
    }
}

#[async_trait]
impl ChangeSubscriber for DashboardReconciler {
    async fn on_event(&self, event: &ChangeEvent) -> Result<(), DomainError> {
        if self.inner.state.lock().await.closed {
            return Ok(());
        }
        self.apply_event(event).await
    }

    async fn on_error(&self, error: &RealtimeError) {
        tracing::error!(error = %error, "Dashboard lost live updates");
        self.inner.state.lock().await.last_error = Some(error.clone());
    }

    fn name(&self) -> &'static str {
        "DashboardReconciler"
    }
}
