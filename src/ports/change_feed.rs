//! ChangeFeedTransport port - Interface to the backend's realtime channels.
//!
//! A transport opens named channels, attaches table/event filters to them and
//! reports everything that happens on a channel as a [`TransportSignal`]
//! tagged with the channel's [`TransportHandle`]. Reconnection policy lives
//! above this port; adapters only report what they observe.

use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

use crate::domain::realtime::{ChangeEvent, ChannelScope, Operation};

/// Opaque identity of one physical channel opened by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportHandle(u64);

impl TransportHandle {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Channel status as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

impl ChannelStatus {
    /// Parses the wire name (`SUBSCRIBED`, `CHANNEL_ERROR`, `TIMED_OUT`, `CLOSED`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "SUBSCRIBED" => Some(ChannelStatus::Subscribed),
            "CHANNEL_ERROR" => Some(ChannelStatus::ChannelError),
            "TIMED_OUT" => Some(ChannelStatus::TimedOut),
            "CLOSED" => Some(ChannelStatus::Closed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Subscribed => "SUBSCRIBED",
            ChannelStatus::ChannelError => "CHANNEL_ERROR",
            ChannelStatus::TimedOut => "TIMED_OUT",
            ChannelStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which channel to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub topic: String,
    pub scope: ChannelScope,
}

impl ChannelSpec {
    pub fn new(topic_prefix: &str, scope: ChannelScope) -> Self {
        Self {
            topic: scope.topic(topic_prefix),
            scope,
        }
    }
}

/// One table interest on a channel.
///
/// `event` of `None` listens to every operation. `filter` uses the backend's
/// `column=eq.value` syntax.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableFilter {
    pub event: Option<Operation>,
    pub schema: String,
    pub table: String,
    pub filter: Option<String>,
}

impl TableFilter {
    /// Every operation on `schema.table`, unfiltered.
    pub fn all_events(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            event: None,
            schema: schema.into(),
            table: table.into(),
            filter: None,
        }
    }

    /// Restricts the filter to rows whose `column` equals `value`.
    pub fn with_equality(mut self, column: &str, value: &str) -> Self {
        self.filter = Some(format!("{}=eq.{}", column, value));
        self
    }

    /// Wire name of the event selector.
    pub fn event_name(&self) -> &'static str {
        self.event.map(|op| op.as_str()).unwrap_or("*")
    }
}

/// What a transport observed on a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalKind {
    Status {
        status: ChannelStatus,
        error: Option<String>,
    },
    Change(ChangeEvent),
}

/// A signal from a transport, tagged with the channel it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSignal {
    pub handle: TransportHandle,
    pub kind: SignalKind,
}

impl TransportSignal {
    pub fn status(handle: TransportHandle, status: ChannelStatus, error: Option<String>) -> Self {
        Self {
            handle,
            kind: SignalKind::Status { status, error },
        }
    }

    pub fn change(handle: TransportHandle, event: ChangeEvent) -> Self {
        Self {
            handle,
            kind: SignalKind::Change(event),
        }
    }
}

/// Where a transport delivers signals for a channel.
pub type SignalSender = mpsc::UnboundedSender<TransportSignal>;

/// Errors that can occur in transport operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The backend refused the channel (network, auth).
    #[error("channel open rejected: {0}")]
    Rejected(String),

    /// The handle does not name an open channel.
    #[error("unknown channel handle {0}")]
    UnknownHandle(TransportHandle),

    /// Connection-level failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend sent something the adapter does not understand.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Port for the backend's realtime change feed.
#[async_trait]
pub trait ChangeFeedTransport: Send + Sync {
    /// Opens the channel named by `spec` with an initial set of filters.
    ///
    /// Idempotent per topic: while that topic is open or connecting the
    /// existing handle is returned. Status transitions and change events are
    /// pushed to `signals`. An `Err` means the open was rejected outright.
    async fn open(
        &self,
        spec: &ChannelSpec,
        filters: &[TableFilter],
        signals: SignalSender,
    ) -> Result<TransportHandle, TransportError>;

    /// Attaches another table interest to an open channel.
    async fn register_filter(
        &self,
        handle: TransportHandle,
        filter: TableFilter,
    ) -> Result<(), TransportError>;

    /// Releases the physical channel.
    async fn close(&self, handle: TransportHandle) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::BranchId;

    #[allow(dead_code)]
    fn assert_transport_object_safe(_: &dyn ChangeFeedTransport) {}

    #[test]
    fn status_round_trips_wire_names() {
        for status in [
            ChannelStatus::Subscribed,
            ChannelStatus::ChannelError,
            ChannelStatus::TimedOut,
            ChannelStatus::Closed,
        ] {
            assert_eq!(ChannelStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ChannelStatus::parse("JOINING"), None);
    }

    #[test]
    fn table_filter_builds_equality_filter() {
        let filter = TableFilter::all_events("public", "orders").with_equality("branch_id", "B1");
        assert_eq!(filter.filter.as_deref(), Some("branch_id=eq.B1"));
        assert_eq!(filter.event_name(), "*");
    }

    #[test]
    fn channel_spec_derives_topic_from_scope() {
        let spec = ChannelSpec::new(
            "orders",
            ChannelScope::Branch(BranchId::new("B1").unwrap()),
        );
        assert_eq!(spec.topic, "orders:branch:B1");
    }
}
