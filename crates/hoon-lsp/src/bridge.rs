//! Correlates the local client with the ship's language-server agent.
//!
//! Local notifications are poked at the ship as they arrive. Local requests
//! are poked with a fresh correlation id and parked until an update carrying
//! that id comes back on the bridge's subscription. Updates without an id
//! are notifications for the client.
//!
//! Pokes leave in the order the client's messages arrived: the PUT is
//! awaited inline, only the wait for the ship's answer is spawned.

use crate::capabilities;
use crate::config::{BridgeConfig, Marks, Methods};
use crate::error::{BridgeError, Result};
use crate::lsp::connection::{MessageHandler, Outbound, Responder};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use urbit_channel::{
    Channel, ChannelError, ConnectionState, PendingPoke, Subscription, SubscriptionEvent,
};

type Reply = oneshot::Sender<Result<Value>>;

/// A request that has been poked and is waiting for its answer.
#[derive(Debug)]
pub struct ForwardedRequest {
    id: String,
    method: String,
    poke: PendingPoke,
    reply: oneshot::Receiver<Result<Value>>,
}

impl ForwardedRequest {
    /// Correlation id carried in the forwarded envelope.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// The language server bridge.
pub struct Bridge {
    channel: Channel,
    config: BridgeConfig,
    outbound: Outbound,
    pending: Mutex<HashMap<String, Reply>>,
    span: Span,
}

impl Bridge {
    pub fn new(channel: Channel, config: BridgeConfig, outbound: Outbound) -> Arc<Self> {
        let span = info_span!("bridge", ship = %config.ship, app = %config.app);
        Arc::new(Self {
            channel,
            config,
            outbound,
            pending: Mutex::new(HashMap::new()),
            span,
        })
    }

    /// Number of forwarded requests still waiting for an answer.
    pub fn pending_requests(&self) -> usize {
        self.pending().len()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, Reply>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the subscription and start delivering its updates.
    ///
    /// If the first attempt fails the error is returned and the background
    /// task keeps retrying with backoff.
    pub async fn serve(self: &Arc<Self>) -> Result<()> {
        let first = self.subscribe().await;
        let (initial, outcome) = match first {
            Ok(subscription) => (Some(subscription), Ok(())),
            Err(e) => {
                error!(parent: &self.span, "Failed to subscribe: {}", e);
                (None, Err(e))
            }
        };
        let bridge = self.clone();
        tokio::spawn(
            async move { bridge.run_subscription(initial).await }.instrument(self.span.clone()),
        );
        outcome
    }

    async fn subscribe(&self) -> Result<Subscription> {
        let subscription = self
            .channel
            .subscribe(&self.config.ship, &self.config.app, &self.config.path)
            .await?;
        info!(
            parent: &self.span,
            "Subscribed to {}{} as {}",
            self.config.app,
            self.config.path,
            subscription.id()
        );
        Ok(subscription)
    }

    /// Deliver updates, re-subscribing when the subscription ends.
    async fn run_subscription(self: Arc<Self>, mut current: Option<Subscription>) {
        let mut backoff = self.config.resubscribe.backoff();

        loop {
            if let Some(mut subscription) = current.take() {
                while let Some(event) = subscription.next().await {
                    match event {
                        SubscriptionEvent::Diff(update) => {
                            backoff.reset();
                            self.on_subscription_event(update);
                        }
                        SubscriptionEvent::Error(e) => error!("Subscription Errored: {}", e),
                        SubscriptionEvent::Quit => error!("Subscription Quit"),
                    }
                }
            }

            if self.channel.connection_state() == ConnectionState::Closed {
                error!("Channel closed; no further updates from the ship");
                self.fail_pending(|| BridgeError::SubscriptionLost);
                return;
            }

            let Some(delay) = backoff.next_delay() else {
                error!(
                    "Giving up on the subscription after {} attempts",
                    backoff.failures()
                );
                self.fail_pending(|| BridgeError::SubscriptionLost);
                return;
            };
            warn!("Re-subscribing in {:?}", delay);
            tokio::time::sleep(delay).await;

            match self.subscribe().await {
                Ok(subscription) => current = Some(subscription),
                Err(BridgeError::Channel(ChannelError::ChannelClosed)) => {
                    self.fail_pending(|| BridgeError::SubscriptionLost);
                    return;
                }
                Err(e) => warn!("Re-subscribe failed: {}", e),
            }
        }
    }

    fn fail_pending(&self, error: impl Fn() -> BridgeError) {
        let pending: Vec<_> = self.pending().drain().collect();
        if !pending.is_empty() {
            warn!("Failing {} requests still waiting for the ship", pending.len());
        }
        for (_, reply) in pending {
            let _ = reply.send(Err(error()));
        }
    }

    /// Forward a client notification.
    ///
    /// Returns once the poke has been sent; the ship's answer is only
    /// logged. The re-delivered method is poked a second time after the
    /// configured delay.
    pub async fn on_local_notification(&self, method: &str, params: Option<Value>) {
        let envelope = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });

        match self
            .channel
            .send_poke(
                &self.config.ship,
                &self.config.app,
                Marks::NOTIFICATION,
                envelope.clone(),
            )
            .await
        {
            Ok(poke) => {
                let watch = notification_outcome(
                    self.channel.clone(),
                    method.to_string(),
                    poke,
                    self.config.request_timeout,
                );
                tokio::spawn(watch.instrument(self.span.clone()));
            }
            Err(e) => warn!(parent: &self.span, "Failed to forward {}: {}", method, e),
        }

        if method == self.config.redelivered_method {
            let channel = self.channel.clone();
            let config = self.config.clone();
            tokio::spawn(
                async move {
                    tokio::time::sleep(config.notification_delay).await;
                    debug!("Re-delivering {}", config.redelivered_method);
                    match channel
                        .send_poke(&config.ship, &config.app, Marks::NOTIFICATION, envelope)
                        .await
                    {
                        Ok(poke) => {
                            notification_outcome(
                                channel,
                                config.redelivered_method,
                                poke,
                                config.request_timeout,
                            )
                            .await
                        }
                        Err(e) => warn!("Re-delivered notification failed: {}", e),
                    }
                }
                .instrument(self.span.clone()),
            );
        }
    }

    /// Handle a client request end to end.
    pub async fn on_local_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if let Some(result) = self.answer_locally(method) {
            return Ok(result);
        }
        let forwarded = self.forward_request(method, params).await?;
        self.await_reply(forwarded).await
    }

    /// Requests the bridge answers without the ship.
    fn answer_locally(&self, method: &str) -> Option<Value> {
        (method == Methods::INITIALIZE).then(capabilities::initialize_result)
    }

    /// Register and poke a request; returns once the poke has been sent.
    pub async fn forward_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<ForwardedRequest> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, reply) = oneshot::channel();
        self.pending().insert(id.clone(), tx);

        let envelope = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let sent = self
            .channel
            .send_poke(&self.config.ship, &self.config.app, Marks::REQUEST, envelope)
            .await;

        match sent {
            Ok(poke) => {
                debug!(parent: &self.span, "Forwarded {} as {}", method, id);
                Ok(ForwardedRequest {
                    id,
                    method: method.to_string(),
                    poke,
                    reply,
                })
            }
            Err(e) => {
                self.pending().remove(&id);
                Err(e.into())
            }
        }
    }

    /// Wait for the answer to a forwarded request.
    ///
    /// A rejected poke fails the request immediately. If nothing arrives in
    /// time the entry is dropped, the channel stops waiting for the poke and
    /// `RequestTimeout` is returned.
    pub async fn await_reply(&self, forwarded: ForwardedRequest) -> Result<Value> {
        let ForwardedRequest {
            id,
            method,
            poke,
            mut reply,
        } = forwarded;
        let poke_id = poke.id();

        let waiting = async {
            let poke = poke.outcome();
            tokio::pin!(poke);
            tokio::select! {
                answer = &mut reply => answer.unwrap_or(Err(BridgeError::SubscriptionLost)),
                outcome = &mut poke => match outcome {
                    Ok(()) => reply.await.unwrap_or(Err(BridgeError::SubscriptionLost)),
                    Err(e) => Err(e.into()),
                },
            }
        };

        let outcome = match tokio::time::timeout(self.config.request_timeout, waiting).await {
            Ok(outcome) => outcome,
            Err(_) => Err(BridgeError::RequestTimeout {
                method,
                timeout: self.config.request_timeout,
            }),
        };
        if outcome.is_err() {
            self.pending().remove(&id);
            self.channel.forget_poke(poke_id);
        }
        outcome
    }

    /// Route one update from the ship.
    pub fn on_subscription_event(&self, update: Value) {
        let Some(id) = update.get("id") else {
            self.push_notification(update);
            return;
        };

        let key = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let Some(reply) = self.pending().remove(&key) else {
            warn!(parent: &self.span, "Unrecognised request {}", key);
            return;
        };

        let outcome = match update.get("error") {
            Some(error) => Err(remote_error(error)),
            None => Ok(update.get("result").cloned().unwrap_or(Value::Null)),
        };
        if reply.send(outcome).is_err() {
            debug!(parent: &self.span, "Request {} was abandoned", key);
        }
    }

    fn push_notification(&self, update: Value) {
        let Some(method) = update.get("method").and_then(Value::as_str) else {
            warn!(parent: &self.span, "Update with neither id nor method: {}", update);
            return;
        };
        if let Err(e) = self.outbound.notify(method, update.get("params").cloned()) {
            warn!(parent: &self.span, "Dropping {} for the client: {}", method, e);
        }
    }
}

/// Log the ship's answer to a notification poke, giving up after `timeout`.
async fn notification_outcome(
    channel: Channel,
    method: String,
    poke: PendingPoke,
    timeout: Duration,
) {
    let id = poke.id();
    match tokio::time::timeout(timeout, poke.outcome()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Notification {} rejected: {}", method, e),
        Err(_) => {
            channel.forget_poke(id);
            warn!("No answer to notification {} after {:?}", method, timeout);
        }
    }
}

/// Turn a JSON-RPC error object from the ship into a `Remote` error.
fn remote_error(error: &Value) -> BridgeError {
    BridgeError::Remote {
        code: error.get("code").and_then(Value::as_i64).unwrap_or(-32603),
        message: error
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| error.to_string()),
        data: error.get("data").cloned(),
    }
}

#[async_trait::async_trait]
impl MessageHandler for Bridge {
    async fn on_notification(self: Arc<Self>, method: String, params: Option<Value>) {
        self.on_local_notification(&method, params).await;
    }

    async fn on_request(
        self: Arc<Self>,
        method: String,
        params: Option<Value>,
        responder: Responder,
    ) {
        if let Some(result) = self.answer_locally(&method) {
            responder.respond(Ok(result));
            return;
        }

        let forwarded = self.forward_request(&method, params).await;
        match forwarded {
            Ok(forwarded) => {
                let span = self.span.clone();
                tokio::spawn(
                    async move {
                        let outcome = self.await_reply(forwarded).await;
                        responder.respond(outcome);
                    }
                    .instrument(span),
                );
            }
            Err(e) => responder.respond(Err(e)),
        }
    }
}
