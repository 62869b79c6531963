//! Channel scope, connection state machine and status snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::{BranchId, StateMachine, ValidationError};

/// What a physical channel is scoped to.
///
/// Branch-scoped channels carry a server-side branch filter. Subscribers
/// without a branch filter share one global channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelScope {
    Global,
    Branch(BranchId),
}

impl ChannelScope {
    /// Scope for an optional branch filter.
    pub fn for_branch(branch: Option<&BranchId>) -> Self {
        match branch {
            Some(branch) => ChannelScope::Branch(branch.clone()),
            None => ChannelScope::Global,
        }
    }

    pub fn branch(&self) -> Option<&BranchId> {
        match self {
            ChannelScope::Global => None,
            ChannelScope::Branch(branch) => Some(branch),
        }
    }

    /// Channel topic name under the given prefix, e.g. `orders:branch:B1`.
    pub fn topic(&self, prefix: &str) -> String {
        format!("{}:{}", prefix, self)
    }
}

impl fmt::Display for ChannelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelScope::Global => write!(f, "global"),
            ChannelScope::Branch(branch) => write!(f, "branch:{}", branch),
        }
    }
}

/// Connection state of one physical channel.
///
/// ```text
/// Connecting --SUBSCRIBED--> Open --error/timeout--> Degraded
/// Connecting --failure-----> Degraded --backoff----> Connecting
/// any --------close/give up-> Closed --reconnect()--> Connecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Degraded,
    Closed,
}

impl StateMachine for ConnectionState {
    fn can_transition_to(&self, target: &Self) -> bool {
        use ConnectionState::*;
        matches!(
            (self, target),
            (Connecting, Open)
                | (Connecting, Degraded)
                | (Connecting, Closed)
                | (Open, Degraded)
                | (Open, Closed)
                | (Degraded, Connecting)
                | (Degraded, Closed)
                | (Closed, Connecting)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use ConnectionState::*;
        match self {
            Connecting => vec![Open, Degraded, Closed],
            Open => vec![Degraded, Closed],
            Degraded => vec![Connecting, Closed],
            Closed => vec![Connecting],
        }
    }
}

/// Indicator the UI renders for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionBadge {
    /// First connection attempt in progress.
    Connecting,
    /// Receiving live updates.
    Live,
    /// Lost the connection; retrying with backoff.
    Reconnecting,
    /// Retries exhausted or channel closed; needs a manual reconnect.
    Disconnected,
}

/// Point-in-time view of a channel, pushed to status observers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSnapshot {
    pub scope: ChannelScope,
    pub state: ConnectionState,
    /// Reconnect attempts since the last successful open.
    pub attempt: u32,
    /// True once retries are exhausted; cleared by an explicit reconnect.
    pub gave_up: bool,
    pub last_error: Option<String>,
}

impl ChannelSnapshot {
    /// Snapshot for a channel that has not connected yet.
    pub fn connecting(scope: ChannelScope) -> Self {
        Self {
            scope,
            state: ConnectionState::Connecting,
            attempt: 0,
            gave_up: false,
            last_error: None,
        }
    }

    /// Moves to `target` if the state machine allows it; staying put always succeeds.
    pub fn advance(&mut self, target: ConnectionState) -> Result<(), ValidationError> {
        if self.state != target {
            self.state = self.state.transition_to(target)?;
        }
        Ok(())
    }

    pub fn badge(&self) -> ConnectionBadge {
        match self.state {
            ConnectionState::Open => ConnectionBadge::Live,
            ConnectionState::Closed => ConnectionBadge::Disconnected,
            ConnectionState::Connecting if self.attempt == 0 => ConnectionBadge::Connecting,
            ConnectionState::Connecting | ConnectionState::Degraded => {
                ConnectionBadge::Reconnecting
            }
        }
    }
}
