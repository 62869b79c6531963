//! MetricsRefreshTrigger - debounced "reload the metrics" notifications.
//!
//! The metrics page only needs to know *that* orders changed, not how. Change
//! events for the watched tables are collected until no new event arrives
//! for the quiet window; then one [`MetricsRefresh`] is published. A steady
//! stream of events still yields a refresh once the oldest pending change has
//! waited `max_wait`.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use crate::domain::foundation::{BranchId, DomainError};
use crate::domain::realtime::ChangeEvent;
use crate::ports::{ChangeSubscriber, Subscriber};

/// One metrics reload request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsRefresh {
    /// Increments with every published refresh; zero means none yet.
    pub generation: u64,
    /// Tables that changed since the previous refresh.
    pub tables: BTreeSet<String>,
}

#[derive(Default)]
struct TriggerState {
    pending: BTreeSet<String>,
    /// When the oldest pending change arrived.
    pending_since: Option<Instant>,
    token: u64,
    generation: u64,
    closed: bool,
}

struct TriggerInner {
    tables: Vec<String>,
    branch: Option<BranchId>,
    quiet_window: Duration,
    max_wait: Duration,
    state: Mutex<TriggerState>,
    refreshes: watch::Sender<MetricsRefresh>,
}

#[derive(Clone)]
pub struct MetricsRefreshTrigger {
    inner: Arc<TriggerInner>,
}

impl MetricsRefreshTrigger {
    /// `max_wait` caps how long a change can wait behind later ones; it is
    /// raised to `quiet_window` when shorter.
    pub fn new(
        tables: Vec<String>,
        branch: Option<BranchId>,
        quiet_window: Duration,
        max_wait: Duration,
    ) -> Self {
        let (refreshes, _) = watch::channel(MetricsRefresh::default());
        Self {
            inner: Arc::new(TriggerInner {
                tables,
                branch,
                quiet_window,
                max_wait: max_wait.max(quiet_window),
                state: Mutex::new(TriggerState::default()),
                refreshes,
            }),
        }
    }

    pub fn subscribers(&self) -> Vec<Subscriber> {
        let handler: Arc<dyn ChangeSubscriber> = Arc::new(self.clone());
        self.inner
            .tables
            .iter()
            .map(|table| Subscriber::new(table.clone(), self.inner.branch.clone(), handler.clone()))
            .collect()
    }

    pub fn watch(&self) -> watch::Receiver<MetricsRefresh> {
        self.inner.refreshes.subscribe()
    }

    /// Drops any pending refresh and ignores later events.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        state.closed = true;
        state.pending.clear();
        state.pending_since = None;
        state.token += 1;
    }
}

async fn fire_at(inner: Arc<TriggerInner>, token: u64, deadline: Instant) {
    tokio::time::sleep_until(deadline).await;

    let mut state = inner.state.lock().await;
    if state.closed || state.token != token || state.pending.is_empty() {
        return;
    }
    state.generation += 1;
    state.pending_since = None;
    let refresh = MetricsRefresh {
        generation: state.generation,
        tables: std::mem::take(&mut state.pending),
    };
    tracing::debug!(generation = refresh.generation, tables = ?refresh.tables, "Metrics refresh due");
    inner.refreshes.send_replace(refresh);
}

#[async_trait]
impl ChangeSubscriber for MetricsRefreshTrigger {
    async fn on_event(&self, event: &ChangeEvent) -> Result<(), DomainError> {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Ok(());
        }
        let now = Instant::now();
        let since = *state.pending_since.get_or_insert(now);
        let deadline = (now + self.inner.quiet_window).min(since + self.inner.max_wait);

        state.pending.insert(event.table().to_string());
        state.token += 1;
        tokio::spawn(fire_at(self.inner.clone(), state.token, deadline));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "MetricsRefreshTrigger"
    }
}
