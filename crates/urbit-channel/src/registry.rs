//! Registries of in-flight channel operations.
//!
//! Two tables keyed by command id:
//!
//! - [`CommandRegistry`]: pokes waiting for exactly one `ok`/`err` frame.
//!   Removed when resolved or failed.
//! - [`SubscriptionRegistry`]: subscriptions receiving zero or more diffs and
//!   at most one terminal event. `Active -> Terminated`, removed on the
//!   transition so nothing can be delivered afterwards.
//!
//! Both are owned by the channel and only touched under its state lock.

use crate::error::{ChannelError, Result};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

/// Final state of a pending command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Resolved,
    Failed,
}

#[derive(Debug)]
struct PendingCommand {
    outcome: oneshot::Sender<Result<()>>,
}

/// Outstanding pokes, keyed by command id.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    entries: HashMap<u64, PendingCommand>,
}

impl CommandRegistry {
    /// Register command `id` as waiting for its outcome.
    pub fn register(&mut self, id: u64) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(id, PendingCommand { outcome: tx });
        rx
    }

    /// Resolve `id` with `outcome` and remove it.
    ///
    /// Returns `None` when no command with that id is pending.
    pub fn resolve(&mut self, id: u64, outcome: Result<()>) -> Option<CommandState> {
        let pending = self.entries.remove(&id)?;
        let state = if outcome.is_ok() {
            CommandState::Resolved
        } else {
            CommandState::Failed
        };
        // The caller may have stopped waiting; the entry is gone either way.
        let _ = pending.outcome.send(outcome);
        Some(state)
    }

    /// Drop `id` without resolving it (the caller already has its error).
    pub fn remove(&mut self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Fail every pending command, e.g. on teardown.
    pub fn fail_all(&mut self, error: impl Fn() -> ChannelError) -> usize {
        let count = self.entries.len();
        for (_, pending) in self.entries.drain() {
            let _ = pending.outcome.send(Err(error()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Something that happened on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// An incremental update; may occur any number of times.
    Diff(Value),
    /// The subscribe was rejected. Terminal.
    Error(String),
    /// The ship closed the subscription. Terminal.
    Quit,
}

/// Lifecycle of a pending subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active { diffs_delivered: u64 },
    Terminated,
}

/// What happened to a frame handed to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// A terminal event was delivered and the entry removed.
    Terminated,
    /// Frame was valid for the entry's state but carried nothing to deliver.
    Ignored,
    /// No subscription with that id.
    Unknown,
}

#[derive(Debug)]
struct PendingSubscription {
    state: SubscriptionState,
    sink: mpsc::UnboundedSender<SubscriptionEvent>,
}

/// Outstanding subscriptions, keyed by subscription id.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<u64, PendingSubscription>,
}

impl SubscriptionRegistry {
    /// Register subscription `id` as active and return its event stream.
    pub fn register(&mut self, id: u64) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.entries.insert(
            id,
            PendingSubscription {
                state: SubscriptionState::Active { diffs_delivered: 0 },
                sink: tx,
            },
        );
        Subscription { id, events: rx }
    }

    /// Deliver a diff; the entry stays active.
    pub fn deliver_diff(&mut self, id: u64, json: Value) -> Delivery {
        let Some(pending) = self.entries.get_mut(&id) else {
            return Delivery::Unknown;
        };
        if let SubscriptionState::Active { diffs_delivered } = &mut pending.state {
            *diffs_delivered += 1;
        }
        if pending.sink.send(SubscriptionEvent::Diff(json)).is_err() {
            // Nobody is listening any more; forget the subscription.
            self.entries.remove(&id);
            return Delivery::Terminated;
        }
        Delivery::Delivered
    }

    /// Deliver a subscribe-response error.
    ///
    /// Only honoured before the first diff; afterwards the subscription is
    /// evidently live and the frame is ignored.
    pub fn reject(&mut self, id: u64, message: String) -> Delivery {
        match self.state(id) {
            None => Delivery::Unknown,
            Some(SubscriptionState::Active { diffs_delivered: 0 }) => {
                self.terminate(id, SubscriptionEvent::Error(message))
            }
            Some(_) => Delivery::Ignored,
        }
    }

    /// Deliver a quit.
    pub fn quit(&mut self, id: u64) -> Delivery {
        self.terminate(id, SubscriptionEvent::Quit)
    }

    fn terminate(&mut self, id: u64, event: SubscriptionEvent) -> Delivery {
        match self.entries.remove(&id) {
            Some(mut pending) => {
                pending.state = SubscriptionState::Terminated;
                let _ = pending.sink.send(event);
                Delivery::Terminated
            }
            None => Delivery::Unknown,
        }
    }

    pub fn remove(&mut self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn state(&self, id: u64) -> Option<SubscriptionState> {
        self.entries.get(&id).map(|pending| pending.state)
    }

    /// End every subscription with `Error(reason)`, e.g. on teardown.
    pub fn terminate_all(&mut self, reason: &str) -> usize {
        let count = self.entries.len();
        for (_, pending) in self.entries.drain() {
            let _ = pending.sink.send(SubscriptionEvent::Error(reason.to_string()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Receiving half of a subscription.
///
/// Yields diffs, then at most one terminal event, then `None`.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    events: mpsc::UnboundedReceiver<SubscriptionEvent>,
}

impl Subscription {
    /// Subscription id (the command id of the subscribe).
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }
}
