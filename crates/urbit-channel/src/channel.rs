//! The channel: one logical session with a ship.
//!
//! Commands are PUT in batches; results come back on the channel's event
//! stream and are matched to pending pokes and subscriptions by id.
//!
//! # Acknowledgments
//!
//! The ship keeps every event it sends until we acknowledge it. Rather than
//! acknowledging on a timer, each outgoing batch is prefixed with an `ack` for
//! the last received event id whenever acknowledgment is behind, and the
//! acknowledged counter is advanced when the batch is built. If the PUT fails
//! the counter is put back, unless a later batch has already moved it.
//!
//! # Locking
//!
//! Both registries and the sequence counters sit behind one mutex, held only
//! for short synchronous sections. A separate async lock serializes PUTs so
//! batches leave in call order.

use crate::command::{error_text, ChannelCommand, ServerFrame};
use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::events::SseEvent;
use crate::registry::{CommandRegistry, Delivery, Subscription, SubscriptionRegistry};
use crate::retry::RetryConfig;
use crate::transport::{ChannelTransport, HttpTransport};
use futures::StreamExt;
use rand::Rng;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Whether the event stream task is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No command has been sent yet, so no stream is open.
    Disconnected,
    /// The stream task is running (connected or reconnecting).
    Connected,
    /// Torn down; every operation fails with [`ChannelError::ChannelClosed`].
    Closed,
}

/// Snapshot of the acknowledgment counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceState {
    pub last_received_event_id: u64,
    pub last_acknowledged_event_id: u64,
}

/// An acknowledgment advanced while building a batch.
#[derive(Debug, Clone, Copy)]
struct AckAdvance {
    from: u64,
    to: u64,
}

#[derive(Debug)]
struct ChannelState {
    next_id: u64,
    received_any: bool,
    last_received_event_id: u64,
    last_acknowledged_event_id: u64,
    commands: CommandRegistry,
    subscriptions: SubscriptionRegistry,
    connection: ConnectionState,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            next_id: 1,
            received_any: false,
            last_received_event_id: 0,
            last_acknowledged_event_id: 0,
            commands: CommandRegistry::default(),
            subscriptions: SubscriptionRegistry::default(),
            connection: ConnectionState::Disconnected,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.connection == ConnectionState::Closed {
            return Err(ChannelError::ChannelClosed);
        }
        Ok(())
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Advance the acknowledged counter if it is behind.
    fn take_ack(&mut self) -> Option<AckAdvance> {
        if self.last_received_event_id == self.last_acknowledged_event_id {
            return None;
        }
        let advance = AckAdvance {
            from: self.last_acknowledged_event_id,
            to: self.last_received_event_id,
        };
        self.last_acknowledged_event_id = self.last_received_event_id;
        Some(advance)
    }

    fn build_batch(&mut self, command: ChannelCommand) -> (Vec<ChannelCommand>, Option<AckAdvance>) {
        let advance = self.take_ack();
        let mut batch = Vec::with_capacity(2);
        if let Some(advance) = advance {
            batch.push(ChannelCommand::Ack {
                event_id: advance.to,
            });
        }
        batch.push(command);
        (batch, advance)
    }

    fn revert_ack(&mut self, advance: AckAdvance) {
        if self.last_acknowledged_event_id == advance.to {
            self.last_acknowledged_event_id = advance.from;
        }
    }

    /// Record an event id; returns false for a replayed event.
    fn observe_event_id(&mut self, id: u64) -> bool {
        if self.received_any && id <= self.last_received_event_id {
            return false;
        }
        self.received_any = true;
        self.last_received_event_id = id;
        true
    }

    fn dispatch(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Poke { id, ok, err } => {
                let outcome = match (ok, err) {
                    (Some(_), _) => Ok(()),
                    (None, Some(err)) => Err(ChannelError::PokeFailed {
                        id,
                        message: error_text(&err),
                    }),
                    (None, None) => {
                        warn!("Invalid poke response for {}", id);
                        Err(ChannelError::InvalidResponse { kind: "poke", id })
                    }
                };
                match self.commands.resolve(id, outcome) {
                    Some(state) => debug!("Poke {} {:?}", id, state),
                    None => warn!("Poke response for unknown command {}", id),
                }
            }
            ServerFrame::Subscribe { id, err: Some(err), .. } => {
                match self.subscriptions.reject(id, error_text(&err)) {
                    Delivery::Unknown => warn!("Subscribe error for unknown subscription {}", id),
                    Delivery::Ignored => {
                        warn!("Ignoring subscribe error for live subscription {}", id)
                    }
                    _ => warn!("Subscription {} rejected: {}", id, error_text(&err)),
                }
            }
            ServerFrame::Subscribe { id, .. } => {
                if self.subscriptions.state(id).is_some() {
                    debug!("Subscription {} is live", id);
                } else {
                    warn!("Subscribe response for unknown subscription {}", id);
                }
            }
            ServerFrame::Diff { id, json } => {
                if self.subscriptions.deliver_diff(id, json) == Delivery::Unknown {
                    warn!("Diff for unknown subscription {}", id);
                }
            }
            ServerFrame::Quit { id } => match self.subscriptions.quit(id) {
                Delivery::Unknown => warn!("Quit for unknown subscription {}", id),
                _ => info!("Subscription {} quit", id),
            },
        }
    }
}

struct Inner {
    uid: String,
    transport: Arc<dyn ChannelTransport>,
    reconnect: RetryConfig,
    state: Mutex<ChannelState>,
    send_lock: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
    span: Span,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// PUT one batch, keeping batches in call order.
    async fn transmit(&self, command: ChannelCommand) -> Result<()> {
        let _ordered = self.send_lock.lock().await;
        let (batch, advance) = {
            let mut state = self.state();
            state.ensure_open()?;
            state.build_batch(command)
        };
        debug!("Sending to channel: {:?}", batch);

        if let Err(e) = self.transport.send(&batch).await {
            if let Some(advance) = advance {
                self.state().revert_ack(advance);
            }
            warn!("Channel PUT failed: {}", e);
            return Err(e);
        }
        Ok(())
    }

    /// Send a standalone acknowledgment of everything received so far.
    async fn acknowledge(&self) -> Result<()> {
        let _ordered = self.send_lock.lock().await;
        let advance = {
            let mut state = self.state();
            state.ensure_open()?;
            if !state.received_any
                || state.last_acknowledged_event_id == state.last_received_event_id
            {
                return Ok(());
            }
            let to = state.last_received_event_id;
            let from = std::mem::replace(&mut state.last_acknowledged_event_id, to);
            AckAdvance { from, to }
        };

        let batch = [ChannelCommand::Ack {
            event_id: advance.to,
        }];
        if let Err(e) = self.transport.send(&batch).await {
            self.state().revert_ack(advance);
            return Err(e);
        }
        Ok(())
    }

    fn handle_event(&self, event: SseEvent) {
        let mut state = self.state();
        if let Some(id) = event.event_id() {
            if !state.observe_event_id(id) {
                debug!("Skipping replayed event {}", id);
                return;
            }
        }

        match serde_json::from_str::<ServerFrame>(&event.data) {
            Ok(frame) => state.dispatch(frame),
            Err(e) => warn!("Unrecognized response {:?}: {}", event.data, e),
        }
    }

    fn resume_point(&self) -> Option<u64> {
        let state = self.state();
        state.received_any.then_some(state.last_received_event_id)
    }

    /// Fail everything pending and stop the stream. Returns false if already closed.
    fn teardown(&self, reason: &str) -> bool {
        let mut state = self.state();
        if state.connection == ConnectionState::Closed {
            return false;
        }
        state.connection = ConnectionState::Closed;
        let commands = state.commands.fail_all(|| ChannelError::ChannelClosed);
        let subscriptions = state.subscriptions.terminate_all(reason);
        drop(state);

        let _ = self.shutdown.send(true);
        info!(
            "Channel {} closed ({}): failed {} pokes, ended {} subscriptions",
            self.uid, reason, commands, subscriptions
        );
        true
    }
}

/// A poke that has been sent and is waiting for the ship's answer.
#[derive(Debug)]
pub struct PendingPoke {
    id: u64,
    outcome: oneshot::Receiver<Result<()>>,
}

impl PendingPoke {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the ship's `ok`/`err`.
    pub async fn outcome(self) -> Result<()> {
        self.outcome.await.unwrap_or(Err(ChannelError::ChannelClosed))
    }
}

/// Client for one channel on a ship.
///
/// Cheap to clone; clones share the same channel.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("uid", &self.inner.uid).finish()
    }
}

impl Channel {
    /// Create a channel talking to the ship described by `config`.
    ///
    /// Nothing is sent until the first command.
    pub fn new(config: &ChannelConfig) -> Result<Self> {
        let uid = generate_uid();
        let transport = HttpTransport::new(config, &uid)?;
        info!("Channel {} at {}", uid, transport.url());
        Ok(Self::with_transport(
            uid,
            Arc::new(transport),
            config.reconnect.clone(),
        ))
    }

    /// Create a channel over an arbitrary transport.
    pub fn with_transport(
        uid: impl Into<String>,
        transport: Arc<dyn ChannelTransport>,
        reconnect: RetryConfig,
    ) -> Self {
        let uid = uid.into();
        let (shutdown, _) = watch::channel(false);
        let span = info_span!("channel", uid = %uid);
        Self {
            inner: Arc::new(Inner {
                uid,
                transport,
                reconnect,
                state: Mutex::new(ChannelState::new()),
                send_lock: tokio::sync::Mutex::new(()),
                shutdown,
                span,
            }),
        }
    }

    pub fn uid(&self) -> &str {
        &self.inner.uid
    }

    /// Poke `app` on `ship` with a `mark`-tagged JSON payload.
    ///
    /// Resolves once the ship answers the poke. Fails with the ship's error,
    /// the transport error if the PUT fails, or `ChannelClosed` on teardown.
    pub async fn poke(&self, ship: &str, app: &str, mark: &str, json: Value) -> Result<()> {
        self.send_poke(ship, app, mark, json).await?.outcome().await
    }

    /// Send a poke and return as soon as the PUT has completed.
    ///
    /// Callers that need their pokes to leave in order await this, then
    /// await [`PendingPoke::outcome`] wherever convenient.
    pub async fn send_poke(
        &self,
        ship: &str,
        app: &str,
        mark: &str,
        json: Value,
    ) -> Result<PendingPoke> {
        let (id, outcome) = {
            let mut state = self.inner.state();
            state.ensure_open()?;
            let id = state.next_id();
            (id, state.commands.register(id))
        };

        let command = ChannelCommand::Poke {
            id,
            ship: ship.to_string(),
            app: app.to_string(),
            mark: mark.to_string(),
            json,
        };
        self.send(command, || {
            self.inner.state().commands.remove(id);
        })
        .await?;

        Ok(PendingPoke { id, outcome })
    }

    /// Subscribe to `path` on `app`.
    ///
    /// Returns once the subscribe has been sent; the subscription is
    /// registered before sending so no early event is lost.
    pub async fn subscribe(&self, ship: &str, app: &str, path: &str) -> Result<Subscription> {
        let subscription = {
            let mut state = self.inner.state();
            state.ensure_open()?;
            let id = state.next_id();
            state.subscriptions.register(id)
        };
        let id = subscription.id();

        let command = ChannelCommand::Subscribe {
            id,
            ship: ship.to_string(),
            app: app.to_string(),
            path: path.to_string(),
        };
        self.send(command, || {
            self.inner.state().subscriptions.remove(id);
        })
        .await?;

        debug!("Subscribed to {}{} as {}", app, path, id);
        Ok(subscription)
    }

    /// Ask the ship to end `subscription`.
    ///
    /// The subscription stays registered until the ship's quit arrives.
    pub async fn unsubscribe(&self, subscription: u64) -> Result<()> {
        let id = {
            let mut state = self.inner.state();
            state.ensure_open()?;
            state.next_id()
        };
        self.send(ChannelCommand::Unsubscribe { id, subscription }, || {})
            .await
    }

    async fn send(&self, command: ChannelCommand, on_failure: impl FnOnce()) -> Result<()> {
        if let Err(e) = self.inner.transmit(command).await {
            on_failure();
            return Err(e);
        }
        self.ensure_connected();
        Ok(())
    }

    /// Start the event stream task unless it is already running.
    pub fn ensure_connected(&self) {
        {
            let mut state = self.inner.state();
            if state.connection != ConnectionState::Disconnected {
                return;
            }
            state.connection = ConnectionState::Connected;
        }

        let inner = self.inner.clone();
        let span = self.inner.span.clone();
        tokio::spawn(run_event_stream(inner).instrument(span));
    }

    /// Tear the channel down.
    ///
    /// Pending pokes fail with `ChannelClosed`, subscriptions end, the stream
    /// stops and the ship is told to discard the channel.
    pub async fn close(&self) -> Result<()> {
        if self.inner.teardown("channel closed") {
            self.inner.transport.close().await?;
        }
        Ok(())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state().connection
    }

    pub fn sequence(&self) -> SequenceState {
        let state = self.inner.state();
        SequenceState {
            last_received_event_id: state.last_received_event_id,
            last_acknowledged_event_id: state.last_acknowledged_event_id,
        }
    }

    /// Stop waiting for the ship's answer to poke `id`.
    ///
    /// A late `ok`/`err` for it is then dropped as unknown. Returns false if
    /// the poke was already resolved.
    pub fn forget_poke(&self, id: u64) -> bool {
        let forgotten = self.inner.state().commands.remove(id);
        if forgotten {
            debug!("Forgot poke {}", id);
        }
        forgotten
    }

    pub fn pending_pokes(&self) -> usize {
        self.inner.state().commands.len()
    }

    pub fn pending_subscriptions(&self) -> usize {
        self.inner.state().subscriptions.len()
    }
}

/// Keep the event stream open until shutdown, reconnecting with backoff.
async fn run_event_stream(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut backoff = inner.reconnect.backoff();
    let mut reconnecting = false;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let resume = inner.resume_point();
        let opened = tokio::select! {
            opened = inner.transport.open_events(resume) => opened,
            _ = shutdown.changed() => break,
        };

        match opened {
            Ok(mut events) => {
                info!("Event stream connected (resuming after {:?})", resume);
                backoff.reset();
                if reconnecting {
                    let ack_inner = inner.clone();
                    tokio::spawn(
                        async move {
                            if let Err(e) = ack_inner.acknowledge().await {
                                warn!("Failed to re-acknowledge after reconnect: {}", e);
                            }
                        }
                        .in_current_span(),
                    );
                }

                loop {
                    let next = tokio::select! {
                        next = events.next() => next,
                        _ = shutdown.changed() => return,
                    };
                    match next {
                        Some(Ok(event)) => inner.handle_event(event),
                        Some(Err(e)) => {
                            warn!("Event Source error: {}", e);
                            break;
                        }
                        None => {
                            warn!("Event stream ended");
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!("Failed to open event stream: {}", e),
        }

        reconnecting = true;
        match backoff.next_delay() {
            Some(delay) => {
                debug!(
                    "Reconnecting event stream in {:?} (attempt {})",
                    delay,
                    backoff.failures()
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }
            None => {
                error!(
                    "Event stream lost after {} reconnect attempts",
                    backoff.failures()
                );
                inner.teardown("event stream lost");
                break;
            }
        }
    }
    debug!("Event stream task finished");
}

/// Channel uid: current time in milliseconds and six random hex digits.
fn generate_uid() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix: u32 = rand::rng().random_range(0..0x100_0000);
    format!("{}-{:06x}", millis, suffix)
}
