//! In-memory change-feed transport for testing.
//!
//! Deterministic and scriptable: every `open` is counted per topic, the
//! acknowledgement behavior can be switched between acknowledge, reject and
//! hang, and tests inject change events or channel failures by topic.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

use crate::domain::realtime::ChangeEvent;
use crate::ports::{
    ChangeFeedTransport, ChannelSpec, ChannelStatus, SignalSender, TableFilter, TransportError,
    TransportHandle, TransportSignal,
};

/// How the transport answers an `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Return a handle and immediately report `SUBSCRIBED`.
    Acknowledge,
    /// Refuse the open with the given reason.
    Reject(String),
    /// Return a handle but never report a status.
    Hang,
}

struct OpenChannel {
    topic: String,
    filters: Vec<TableFilter>,
    signals: SignalSender,
}

struct State {
    behavior: OpenBehavior,
    next_handle: u64,
    channels: HashMap<TransportHandle, OpenChannel>,
    opens: HashMap<String, Vec<Instant>>,
    closes: HashMap<String, usize>,
}

/// Scriptable transport for tests.
///
/// # Example
///
/// ```ignore
/// let transport = Arc::new(InMemoryTransport::new());
/// let registry = SubscriptionRegistry::new(transport.clone(), ChannelSettings::default());
///
/// transport.emit("orders:branch:B1", ChangeEvent::insert("orders", row));
/// assert_eq!(transport.open_count("orders:branch:B1"), 1);
/// ```
pub struct InMemoryTransport {
    state: Mutex<State>,
}

impl InMemoryTransport {
    /// Creates a transport that acknowledges every open.
    pub fn new() -> Self {
        Self::with_behavior(OpenBehavior::Acknowledge)
    }

    pub fn with_behavior(behavior: OpenBehavior) -> Self {
        Self {
            state: Mutex::new(State {
                behavior,
                next_handle: 1,
                channels: HashMap::new(),
                opens: HashMap::new(),
                closes: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Scripting ===

    /// Changes how subsequent opens are answered.
    pub fn set_behavior(&self, behavior: OpenBehavior) {
        self.state().behavior = behavior;
    }

    /// Delivers a change event on the open channel for `topic`.
    pub fn emit(&self, topic: &str, event: ChangeEvent) -> bool {
        let state = self.state();
        match find_topic(&state, topic) {
            Some((handle, channel)) => channel
                .signals
                .send(TransportSignal::change(handle, event))
                .is_ok(),
            None => false,
        }
    }

    /// Delivers a raw signal as if it came from `handle`, open or not.
    pub fn emit_signal(&self, topic: &str, signal: TransportSignal) -> bool {
        let state = self.state();
        match find_topic(&state, topic) {
            Some((_, channel)) => channel.signals.send(signal).is_ok(),
            None => false,
        }
    }

    /// Reports a status (usually a failure) on the open channel for `topic`.
    pub fn report(&self, topic: &str, status: ChannelStatus, error: Option<&str>) -> bool {
        let state = self.state();
        match find_topic(&state, topic) {
            Some((handle, channel)) => channel
                .signals
                .send(TransportSignal::status(
                    handle,
                    status,
                    error.map(str::to_string),
                ))
                .is_ok(),
            None => false,
        }
    }

    /// Acknowledges a channel opened in `Hang` mode.
    pub fn acknowledge(&self, topic: &str) -> bool {
        self.report(topic, ChannelStatus::Subscribed, None)
    }

    // === Test Helpers ===

    /// Number of `open` calls that reached the backend for `topic`.
    pub fn open_count(&self, topic: &str) -> usize {
        self.state().opens.get(topic).map(Vec::len).unwrap_or(0)
    }

    /// When each counted `open` for `topic` happened.
    pub fn open_times(&self, topic: &str) -> Vec<Instant> {
        self.state().opens.get(topic).cloned().unwrap_or_default()
    }

    pub fn close_count(&self, topic: &str) -> usize {
        self.state().closes.get(topic).copied().unwrap_or(0)
    }

    pub fn is_open(&self, topic: &str) -> bool {
        find_topic(&self.state(), topic).is_some()
    }

    pub fn open_channel_count(&self) -> usize {
        self.state().channels.len()
    }

    pub fn current_handle(&self, topic: &str) -> Option<TransportHandle> {
        find_topic(&self.state(), topic).map(|(handle, _)| handle)
    }

    /// Filters registered on the open channel for `topic`.
    pub fn filters(&self, topic: &str) -> Vec<TableFilter> {
        find_topic(&self.state(), topic)
            .map(|(_, channel)| channel.filters.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn find_topic<'a>(state: &'a State, topic: &str) -> Option<(TransportHandle, &'a OpenChannel)> {
    state
        .channels
        .iter()
        .find(|(_, channel)| channel.topic == topic)
        .map(|(handle, channel)| (*handle, channel))
}

#[async_trait]
impl ChangeFeedTransport for InMemoryTransport {
    async fn open(
        &self,
        spec: &ChannelSpec,
        filters: &[TableFilter],
        signals: SignalSender,
    ) -> Result<TransportHandle, TransportError> {
        let mut state = self.state();
        if let Some((handle, _)) = find_topic(&state, &spec.topic) {
            return Ok(handle);
        }

        state
            .opens
            .entry(spec.topic.clone())
            .or_default()
            .push(Instant::now());

        if let OpenBehavior::Reject(reason) = &state.behavior {
            return Err(TransportError::Rejected(reason.clone()));
        }

        let handle = TransportHandle::new(state.next_handle);
        state.next_handle += 1;

        if state.behavior == OpenBehavior::Acknowledge {
            let _ = signals.send(TransportSignal::status(
                handle,
                ChannelStatus::Subscribed,
                None,
            ));
        }

        state.channels.insert(
            handle,
            OpenChannel {
                topic: spec.topic.clone(),
                filters: filters.to_vec(),
                signals,
            },
        );
        Ok(handle)
    }

    async fn register_filter(
        &self,
        handle: TransportHandle,
        filter: TableFilter,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        let channel = state
            .channels
            .get_mut(&handle)
            .ok_or(TransportError::UnknownHandle(handle))?;
        if !channel.filters.contains(&filter) {
            channel.filters.push(filter);
        }
        Ok(())
    }

    async fn close(&self, handle: TransportHandle) -> Result<(), TransportError> {
        let mut state = self.state();
        let channel = state
            .channels
            .remove(&handle)
            .ok_or(TransportError::UnknownHandle(handle))?;
        *state.closes.entry(channel.topic).or_default() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::realtime::ChannelScope;
    use crate::ports::SignalKind;
    use tokio::sync::mpsc;

    fn spec() -> ChannelSpec {
        ChannelSpec::new("orders", ChannelScope::Global)
    }

    #[tokio::test]
    async fn open_acknowledges_and_is_idempotent_per_topic() {
        let transport = InMemoryTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = transport.open(&spec(), &[], tx.clone()).await.unwrap();
        let second = transport.open(&spec(), &[], tx).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.open_count("orders:global"), 1);
        let signal = rx.recv().await.unwrap();
        assert!(matches!(
            signal.kind,
            SignalKind::Status {
                status: ChannelStatus::Subscribed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn rejected_open_is_counted() {
        let transport = InMemoryTransport::with_behavior(OpenBehavior::Reject("auth".into()));
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = transport.open(&spec(), &[], tx).await;

        assert_eq!(result, Err(TransportError::Rejected("auth".into())));
        assert_eq!(transport.open_count("orders:global"), 1);
        assert!(!transport.is_open("orders:global"));
    }

    #[tokio::test]
    async fn close_twice_reports_unknown_handle() {
        let transport = InMemoryTransport::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = transport.open(&spec(), &[], tx).await.unwrap();

        assert!(transport.close(handle).await.is_ok());
        assert_eq!(
            transport.close(handle).await,
            Err(TransportError::UnknownHandle(handle))
        );
        assert_eq!(transport.close_count("orders:global"), 1);
    }

    #[tokio::test]
    async fn register_filter_extends_channel() {
        let transport = InMemoryTransport::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = transport
            .open(&spec(), &[TableFilter::all_events("public", "orders")], tx)
            .await
            .unwrap();

        transport
            .register_filter(handle, TableFilter::all_events("public", "order_line_items"))
            .await
            .unwrap();

        assert_eq!(transport.filters("orders:global").len(), 2);
    }
}
