//! Realtime error taxonomy.

use thiserror::Error;

use super::ChannelScope;
use crate::domain::foundation::SubscriberId;

/// Errors raised by the realtime engine.
///
/// Only `Terminal` is ever handed to subscribers. `Transient` errors are
/// absorbed by the reconnection controller and surface through the status
/// watch; `SubscriberCallback` errors stop at the router.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    #[error("realtime channel {scope} interrupted: {reason}")]
    Transient { scope: ChannelScope, reason: String },

    #[error("realtime channel {scope} gave up after {attempts} reconnect attempts: {reason}")]
    Terminal {
        scope: ChannelScope,
        attempts: u32,
        reason: String,
    },

    #[error("subscriber {name} ({id}) failed: {message}")]
    SubscriberCallback {
        id: SubscriberId,
        name: String,
        message: String,
    },

    #[error("subscription registry is shut down")]
    RegistryClosed,
}

impl RealtimeError {
    /// True when live updates stopped until an explicit reconnect.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RealtimeError::Terminal { .. } | RealtimeError::RegistryClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_terminal_and_closed_are_terminal() {
        let transient = RealtimeError::Transient {
            scope: ChannelScope::Global,
            reason: "timeout".into(),
        };
        let terminal = RealtimeError::Terminal {
            scope: ChannelScope::Global,
            attempts: 5,
            reason: "timeout".into(),
        };

        assert!(!transient.is_terminal());
        assert!(terminal.is_terminal());
        assert!(RealtimeError::RegistryClosed.is_terminal());
    }

    #[test]
    fn terminal_message_names_scope_and_attempts() {
        let err = RealtimeError::Terminal {
            scope: ChannelScope::Global,
            attempts: 5,
            reason: "connect timeout".into(),
        };
        assert_eq!(
            err.to_string(),
            "realtime channel global gave up after 5 reconnect attempts: connect timeout"
        );
    }
}
