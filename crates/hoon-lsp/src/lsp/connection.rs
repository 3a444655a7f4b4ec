//! The local client connection.
//!
//! One task reads framed messages and hands them to a [`MessageHandler`]; a
//! writer task owns the output and serializes everything sent through
//! [`Outbound`] handles, so responses and pushed notifications never
//! interleave on the wire.

use crate::config::Methods;
use crate::error::{BridgeError, Result};
use crate::lsp::framing::{read_message, write_message};
use crate::lsp::message::{Message, Notification, Response};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Handle for sending messages to the client.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Message>,
}

impl Outbound {
    /// Create a handle and the receiving end a writer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Send a notification to the client.
    pub fn notify(&self, method: impl Into<String>, params: Option<Value>) -> Result<()> {
        self.send(Message::Notification(Notification::new(method, params)))
    }

    pub fn send(&self, message: Message) -> Result<()> {
        self.tx.send(message).map_err(|_| BridgeError::Io {
            message: "client connection closed".to_string(),
            source: None,
        })
    }
}

/// Answers one request; dropping it without responding sends nothing.
#[derive(Debug)]
pub struct Responder {
    id: Value,
    outbound: Outbound,
}

impl Responder {
    pub fn respond(self, outcome: Result<Value>) {
        if let Err(e) = &outcome {
            warn!("Request {} failed: {}", self.id, e);
        }
        if let Err(e) = self
            .outbound
            .send(Message::Response(Response::from_outcome(self.id, outcome)))
        {
            warn!("Dropping response: {}", e);
        }
    }
}

/// Receives the client's requests and notifications.
///
/// Both methods are awaited before the next message is read, so a handler
/// that must preserve ordering does its ordered work inline and moves any
/// waiting into a spawned task.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_notification(self: Arc<Self>, method: String, params: Option<Value>);

    async fn on_request(
        self: Arc<Self>,
        method: String,
        params: Option<Value>,
        responder: Responder,
    );
}

/// LSP connection over a byte stream pair, normally stdin and stdout.
pub struct LspConnection<R, W> {
    reader: BufReader<R>,
    writer: W,
    outbound: Outbound,
    outgoing: mpsc::UnboundedReceiver<Message>,
    max_message_size: usize,
}

impl<R, W> LspConnection<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W, max_message_size: usize) -> Self {
        let (outbound, outgoing) = Outbound::channel();
        Self {
            reader: BufReader::new(reader),
            writer,
            outbound,
            outgoing,
            max_message_size,
        }
    }

    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    /// Read and dispatch messages until EOF or `exit`.
    pub async fn listen<H: MessageHandler>(self, handler: Arc<H>) -> Result<()> {
        let Self {
            mut reader,
            writer,
            outbound,
            outgoing,
            max_message_size,
        } = self;

        tokio::spawn(write_loop(writer, outgoing));

        loop {
            let body = match read_message(&mut reader, max_message_size).await? {
                Some(body) => body,
                None => {
                    info!("Client closed the connection");
                    return Ok(());
                }
            };

            let message = match serde_json::from_slice::<Message>(&body) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Unparseable message from client: {}", e);
                    let response =
                        Response::error(Value::Null, -32700, format!("Parse error: {}", e));
                    outbound.send(Message::Response(response))?;
                    continue;
                }
            };

            match message {
                Message::Request(request) => {
                    debug!("Request {} {}", request.id, request.method);
                    let responder = Responder {
                        id: request.id,
                        outbound: outbound.clone(),
                    };
                    handler
                        .clone()
                        .on_request(request.method, request.params, responder)
                        .await;
                }
                Message::Notification(notification) => {
                    debug!("Notification {}", notification.method);
                    let exit = notification.method == Methods::EXIT;
                    handler
                        .clone()
                        .on_notification(notification.method, notification.params)
                        .await;
                    if exit {
                        info!("Client sent exit");
                        return Ok(());
                    }
                }
                Message::Response(response) => {
                    // Nothing is ever sent to the client as a request.
                    debug!("Ignoring response {} from client", response.id);
                }
            }
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outgoing.recv().await {
        let body = match serde_json::to_vec(&message) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to encode message for client: {}", e);
                continue;
            }
        };
        if let Err(e) = write_message(&mut writer, &body).await {
            error!("Failed to write to client: {}", e);
            return;
        }
    }
}
