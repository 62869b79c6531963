//! Channel driver - one task per physical channel.
//!
//! The driver owns everything about its channel: the transport handle, the
//! reconnection state machine, the connect timeout, the scheduled reopen and
//! the subscriber index. Commands from the registry and signals from the
//! transport are handled by a single `select!` loop, so:
//!
//! - membership changes and event dispatch never interleave
//! - timers die with the task, so nothing can reopen a disposed channel
//! - signals from a handle the driver already released are ignored
//!
//! ## Reconnection
//!
//! On any failure (channel error, timeout, unexpected close, rejected open,
//! failed filter registration) the current handle is released and, while
//! `attempt < max_attempts`, a reopen is scheduled after
//! `min(base_delay * 2^attempt, max_delay)`. Once retries are exhausted the
//! channel gives up: it goes `Closed`, every subscriber's `on_error` gets a
//! `Terminal` error, and only an explicit reconnect resumes it.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};

use super::router::SubscriberIndex;
use crate::config::AppConfig;
use crate::domain::foundation::SubscriberId;
use crate::domain::realtime::{
    BackoffPolicy, ChannelScope, ChannelSnapshot, ConnectionState, RealtimeError,
};
use crate::ports::{
    ChangeFeedTransport, ChannelSpec, ChannelStatus, SignalKind, Subscriber, TableFilter,
    TransportHandle, TransportSignal,
};

/// Settings shared by every channel a registry opens.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub backoff: BackoffPolicy,
    pub connect_timeout: Duration,
    pub topic_prefix: String,
    pub schema: String,
    pub branch_column: String,
    /// Tables that carry the branch column and get a server-side filter.
    pub branch_scoped_tables: HashSet<String>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            topic_prefix: "orders".to_string(),
            schema: "public".to_string(),
            branch_column: "branch_id".to_string(),
            branch_scoped_tables: HashSet::from(["orders".to_string()]),
        }
    }
}

impl From<&AppConfig> for ChannelSettings {
    fn from(config: &AppConfig) -> Self {
        let realtime = &config.realtime;
        Self {
            backoff: realtime.backoff_policy(),
            connect_timeout: realtime.connect_timeout(),
            topic_prefix: realtime.topic_prefix.clone(),
            schema: config.backend.schema.clone(),
            branch_column: realtime.branch_column.clone(),
            branch_scoped_tables: realtime.branch_scoped_tables_list().into_iter().collect(),
        }
    }
}

/// Messages from the registry to a driver.
#[derive(Debug)]
pub(crate) enum DriverCommand {
    Attach(Subscriber),
    Detach {
        id: SubscriberId,
        done: oneshot::Sender<bool>,
    },
    Reconnect,
    Close,
}

/// Registry-side ends of a running driver.
pub(crate) struct DriverHandle {
    pub commands: mpsc::UnboundedSender<DriverCommand>,
    pub status: watch::Receiver<ChannelSnapshot>,
    /// Flips to `true` once the channel is fully released.
    pub exited: watch::Receiver<bool>,
}

pub(crate) struct ChannelDriver {
    scope: ChannelScope,
    spec: ChannelSpec,
    settings: ChannelSettings,
    transport: Arc<dyn ChangeFeedTransport>,
    index: SubscriberIndex,
    tables: BTreeSet<String>,
    handle: Option<TransportHandle>,
    snapshot: ChannelSnapshot,
    status: watch::Sender<ChannelSnapshot>,
    exited: watch::Sender<bool>,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
    signals_tx: mpsc::UnboundedSender<TransportSignal>,
    signals_rx: mpsc::UnboundedReceiver<TransportSignal>,
    connect_deadline: Option<Instant>,
    reopen_at: Option<Instant>,
}

impl ChannelDriver {
    /// Spawns the driver task for `scope`.
    ///
    /// When `predecessor` is given, the first open waits until that
    /// previous channel for the same scope has finished closing.
    pub(crate) fn spawn(
        scope: ChannelScope,
        transport: Arc<dyn ChangeFeedTransport>,
        settings: ChannelSettings,
        predecessor: Option<watch::Receiver<bool>>,
    ) -> DriverHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelSnapshot::connecting(scope.clone()));
        let (exited_tx, exited_rx) = watch::channel(false);

        let driver = ChannelDriver {
            spec: ChannelSpec::new(&settings.topic_prefix, scope.clone()),
            index: SubscriberIndex::new(settings.branch_column.clone()),
            snapshot: ChannelSnapshot::connecting(scope.clone()),
            scope,
            settings,
            transport,
            tables: BTreeSet::new(),
            handle: None,
            status: status_tx,
            exited: exited_tx,
            commands: commands_rx,
            signals_tx,
            signals_rx,
            connect_deadline: None,
            reopen_at: None,
        };

        tokio::spawn(driver.run(predecessor));

        DriverHandle {
            commands: commands_tx,
            status: status_rx,
            exited: exited_rx,
        }
    }

    async fn run(mut self, predecessor: Option<watch::Receiver<bool>>) {
        if let Some(mut previous) = predecessor {
            // An error means the previous driver is gone, which is just as good.
            let _ = previous.wait_for(|closed| *closed).await;
        }

        // Attach everyone queued so far so the first open carries their filters.
        while let Ok(command) = self.commands.try_recv() {
            match command {
                DriverCommand::Close => {
                    self.teardown().await;
                    return;
                }
                other => self.handle_command(other).await,
            }
        }

        self.connect().await;

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(DriverCommand::Close) | None => break,
                    Some(command) => self.handle_command(command).await,
                },

                Some(signal) = self.signals_rx.recv() => {
                    self.handle_signal(signal).await;
                }

                _ = wait_until(self.connect_deadline) => {
                    self.connect_deadline = None;
                    self.on_failure("connect timeout".to_string()).await;
                }

                _ = wait_until(self.reopen_at) => {
                    self.reopen_at = None;
                    self.connect().await;
                }
            }
        }

        self.teardown().await;
    }

    async fn handle_command(&mut self, command: DriverCommand) {
        match command {
            DriverCommand::Attach(subscriber) => {
                let table = subscriber.table.clone();
                tracing::debug!(
                    scope = %self.scope,
                    subscriber = %subscriber.id,
                    table = %table,
                    "Subscriber attached"
                );
                self.index.insert(subscriber);

                if self.tables.insert(table.clone()) {
                    if let Some(handle) = self.handle {
                        let filter = self.filter_for(&table);
                        if let Err(e) = self.transport.register_filter(handle, filter).await {
                            self.on_failure(format!("filter registration failed: {}", e))
                                .await;
                        }
                    }
                }
            }
            DriverCommand::Detach { id, done } => {
                let removed = self.index.remove(id).is_some();
                tracing::debug!(scope = %self.scope, subscriber = %id, removed, "Subscriber detached");
                let _ = done.send(removed);
            }
            DriverCommand::Reconnect => {
                if matches!(
                    self.snapshot.state,
                    ConnectionState::Closed | ConnectionState::Degraded
                ) {
                    tracing::info!(scope = %self.scope, "Manual reconnect requested");
                    self.reopen_at = None;
                    self.snapshot.attempt = 0;
                    self.snapshot.gave_up = false;
                    self.connect().await;
                }
            }
            DriverCommand::Close => {}
        }
    }

    async fn handle_signal(&mut self, signal: TransportSignal) {
        if self.handle != Some(signal.handle) {
            tracing::debug!(scope = %self.scope, handle = %signal.handle, "Ignoring signal from released channel");
            return;
        }

        match signal.kind {
            SignalKind::Status {
                status: ChannelStatus::Subscribed,
                ..
            } => {
                self.connect_deadline = None;
                if self.snapshot.state != ConnectionState::Open {
                    tracing::info!(
                        scope = %self.scope,
                        topic = %self.spec.topic,
                        after_attempts = self.snapshot.attempt,
                        "Realtime channel subscribed"
                    );
                    self.snapshot.attempt = 0;
                    self.snapshot.last_error = None;
                    self.transition(ConnectionState::Open);
                }
            }
            SignalKind::Status { status, error } => {
                let reason = match error {
                    Some(error) => format!("{}: {}", status, error),
                    None => status.to_string(),
                };
                self.on_failure(reason).await;
            }
            SignalKind::Change(event) => {
                let report = self.index.dispatch(&event).await;
                tracing::trace!(
                    scope = %self.scope,
                    table = event.table(),
                    operation = %event.operation(),
                    delivered = report.delivered,
                    rejected = report.rejected,
                    failed = report.failed,
                    "Change event dispatched"
                );
            }
        }
    }

    async fn connect(&mut self) {
        self.transition(ConnectionState::Connecting);

        let filters: Vec<TableFilter> = self.tables.iter().map(|t| self.filter_for(t)).collect();
        let deadline = Instant::now() + self.settings.connect_timeout;
        let opened = time::timeout_at(
            deadline,
            self.transport
                .open(&self.spec, &filters, self.signals_tx.clone()),
        )
        .await;

        match opened {
            Ok(Ok(handle)) => {
                tracing::debug!(scope = %self.scope, handle = %handle, "Channel opened, awaiting subscription");
                self.handle = Some(handle);
                self.connect_deadline = Some(deadline);
            }
            Ok(Err(e)) => self.on_failure(e.to_string()).await,
            Err(_) => self.on_failure("connect timeout".to_string()).await,
        }
    }

    async fn on_failure(&mut self, reason: String) {
        self.connect_deadline = None;
        self.release_handle().await;
        self.snapshot.last_error = Some(reason.clone());

        let attempt = self.snapshot.attempt;
        if self.settings.backoff.allows_retry(attempt) {
            let delay = self.settings.backoff.delay_for(attempt);
            self.snapshot.attempt = attempt + 1;
            self.reopen_at = Some(Instant::now() + delay);

            let error = RealtimeError::Transient {
                scope: self.scope.clone(),
                reason,
            };
            tracing::warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "{}; reconnect scheduled",
                error
            );
            self.transition(ConnectionState::Degraded);
        } else {
            self.reopen_at = None;
            self.snapshot.gave_up = true;
            self.transition(ConnectionState::Closed);

            let error = RealtimeError::Terminal {
                scope: self.scope.clone(),
                attempts: attempt,
                reason,
            };
            tracing::error!("{}", error);
            self.index.notify_error(&error).await;
        }
    }

    async fn release_handle(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.transport.close(handle).await {
                tracing::debug!(scope = %self.scope, handle = %handle, error = %e, "Channel close failed");
            }
        }
    }

    async fn teardown(&mut self) {
        self.connect_deadline = None;
        self.reopen_at = None;
        self.release_handle().await;
        self.transition(ConnectionState::Closed);
        tracing::info!(scope = %self.scope, topic = %self.spec.topic, "Realtime channel closed");
        self.exited.send_replace(true);
    }

    fn transition(&mut self, target: ConnectionState) {
        if let Err(e) = self.snapshot.advance(target) {
            tracing::warn!(scope = %self.scope, error = %e, "Illegal connection state change ignored");
        }
        self.status.send_replace(self.snapshot.clone());
    }

    fn filter_for(&self, table: &str) -> TableFilter {
        let filter = TableFilter::all_events(self.settings.schema.clone(), table);
        match self.scope.branch() {
            Some(branch) if self.settings.branch_scoped_tables.contains(table) => {
                filter.with_equality(&self.settings.branch_column, branch.as_str())
            }
            _ => filter,
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
