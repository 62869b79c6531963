//! SubscriptionRegistry - shared entry point to the realtime change feed.
//!
//! Features register `{table, branch_filter, handler}` and get back a
//! [`Subscription`] disposer; they never see transport handles. All
//! subscribers of one branch share one physical channel, driven by a
//! dedicated task (see `driver`).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{oneshot, watch, Mutex};

use super::driver::{ChannelDriver, ChannelSettings, DriverCommand, DriverHandle};
use crate::domain::foundation::{BranchId, SubscriberId};
use crate::domain::realtime::{ChannelScope, ChannelSnapshot, RealtimeError};
use crate::ports::{ChangeFeedTransport, Subscriber};

struct ChannelEntry {
    driver: DriverHandle,
    members: HashSet<SubscriberId>,
}

#[derive(Default)]
struct RegistryState {
    channels: HashMap<ChannelScope, ChannelEntry>,
    owners: HashMap<SubscriberId, ChannelScope>,
    /// Channels that are still closing, keyed by the scope they served.
    retiring: HashMap<ChannelScope, watch::Receiver<bool>>,
    closed: bool,
}

struct RegistryInner {
    transport: Arc<dyn ChangeFeedTransport>,
    settings: ChannelSettings,
    state: Mutex<RegistryState>,
}

/// Owns every realtime channel of one application context.
///
/// Cheap to clone; clones share the same channels. Dropping the last clone
/// closes every channel.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new(transport: Arc<dyn ChangeFeedTransport>, settings: ChannelSettings) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                settings,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    /// Registers a subscriber, opening its branch channel on first use.
    pub async fn subscribe(&self, subscriber: Subscriber) -> Result<Subscription, RealtimeError> {
        let id = subscriber.id;
        let scope = ChannelScope::for_branch(subscriber.branch_filter.as_ref());

        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(RealtimeError::RegistryClosed);
        }

        if !state.channels.contains_key(&scope) {
            let predecessor = state
                .retiring
                .remove(&scope)
                .filter(|exited| !*exited.borrow());
            tracing::info!(scope = %scope, waits_for_previous = predecessor.is_some(), "Opening realtime channel");
            let driver = ChannelDriver::spawn(
                scope.clone(),
                self.inner.transport.clone(),
                self.inner.settings.clone(),
                predecessor,
            );
            state.channels.insert(
                scope.clone(),
                ChannelEntry {
                    driver,
                    members: HashSet::new(),
                },
            );
        }

        let entry = state
            .channels
            .get_mut(&scope)
            .ok_or(RealtimeError::RegistryClosed)?;
        entry
            .driver
            .commands
            .send(DriverCommand::Attach(subscriber))
            .map_err(|_| RealtimeError::RegistryClosed)?;
        entry.members.insert(id);
        state.owners.insert(id, scope);

        Ok(Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
            disposed: AtomicBool::new(false),
        })
    }

    /// Removes a subscriber; returns false when it was not registered.
    ///
    /// When it was the last subscriber of its channel the channel is closed.
    /// On return no further event reaches the subscriber. Must not be
    /// awaited from inside a callback of the same channel.
    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        enum Pending {
            Detach(oneshot::Receiver<bool>),
            Close(ChannelScope, watch::Receiver<bool>),
        }

        let pending = {
            let mut state = self.inner.state.lock().await;
            let Some(scope) = state.owners.remove(&id) else {
                return false;
            };
            let Some(entry) = state.channels.get_mut(&scope) else {
                return true;
            };
            entry.members.remove(&id);

            if entry.members.is_empty() {
                let Some(entry) = state.channels.remove(&scope) else {
                    return true;
                };
                let _ = entry.driver.commands.send(DriverCommand::Close);
                let exited = entry.driver.exited.clone();
                state.retiring.insert(scope.clone(), exited.clone());
                Pending::Close(scope, exited)
            } else {
                let (done, wait) = oneshot::channel();
                let _ = entry.driver.commands.send(DriverCommand::Detach { id, done });
                Pending::Detach(wait)
            }
        };

        match pending {
            Pending::Detach(wait) => {
                let _ = wait.await;
            }
            Pending::Close(scope, mut exited) => {
                let _ = exited.wait_for(|closed| *closed).await;
                let mut state = self.inner.state.lock().await;
                if state
                    .retiring
                    .get(&scope)
                    .is_some_and(|current| current.same_channel(&exited))
                {
                    state.retiring.remove(&scope);
                }
            }
        }

        tracing::debug!(subscriber = %id, "Unsubscribed");
        true
    }

    /// Resumes a channel after it gave up; returns false if no such channel.
    pub async fn reconnect(&self, branch: Option<&BranchId>) -> bool {
        let state = self.inner.state.lock().await;
        match state.channels.get(&ChannelScope::for_branch(branch)) {
            Some(entry) => entry.driver.commands.send(DriverCommand::Reconnect).is_ok(),
            None => false,
        }
    }

    /// Current snapshot of the channel serving `branch`.
    pub async fn status(&self, branch: Option<&BranchId>) -> Option<ChannelSnapshot> {
        let state = self.inner.state.lock().await;
        state
            .channels
            .get(&ChannelScope::for_branch(branch))
            .map(|entry| entry.driver.status.borrow().clone())
    }

    /// Push-based observer of the channel serving `branch`.
    pub async fn watch_status(
        &self,
        branch: Option<&BranchId>,
    ) -> Option<watch::Receiver<ChannelSnapshot>> {
        let state = self.inner.state.lock().await;
        state
            .channels
            .get(&ChannelScope::for_branch(branch))
            .map(|entry| entry.driver.status.clone())
    }

    pub async fn channel_count(&self) -> usize {
        self.inner.state.lock().await.channels.len()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.state.lock().await.owners.len()
    }

    /// Closes every channel and rejects further subscriptions.
    pub async fn shutdown(&self) {
        let exits: Vec<watch::Receiver<bool>> = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            state.owners.clear();
            state
                .channels
                .drain()
                .map(|(_, entry)| {
                    let _ = entry.driver.commands.send(DriverCommand::Close);
                    entry.driver.exited
                })
                .collect()
        };

        tracing::info!(channels = exits.len(), "Shutting down subscription registry");
        for mut exited in exits {
            let _ = exited.wait_for(|closed| *closed).await;
        }
    }
}

/// Disposer handed to a feature on subscribe.
///
/// Holds only a weak reference to the registry, so it never keeps channels
/// alive. Unsubscribing is idempotent.
#[must_use = "dropping a Subscription does not unsubscribe; call `unsubscribe`"]
pub struct Subscription {
    id: SubscriberId,
    registry: Weak<RegistryInner>,
    disposed: AtomicBool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Unsubscribes; returns true only for the call that actually did it.
    pub async fn unsubscribe(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        match self.registry.upgrade() {
            Some(inner) => SubscriptionRegistry { inner }.unsubscribe(self.id).await,
            None => false,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
