//! HTTP transport for one channel resource.
//!
//! The channel talks to the ship through [`ChannelTransport`] so the protocol
//! logic can be driven without a ship. [`HttpTransport`] is the reqwest
//! implementation:
//!
//! - `PUT    /~/channel/<uid>`: JSON array of commands
//! - `GET    /~/channel/<uid>`: `text/event-stream` of frames
//! - `DELETE /~/channel/<uid>`: discard the channel on the ship

use crate::command::ChannelCommand;
use crate::config::{ChannelConfig, NetworkConfig};
use crate::error::{ChannelError, Result};
use crate::events::{decode_event_stream, SseEvent};
use futures::stream::BoxStream;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, COOKIE};
use reqwest::{Client, RequestBuilder, Response};
use tracing::debug;
use url::Url;

/// Stream of SSE events from the ship.
pub type EventStream = BoxStream<'static, Result<SseEvent>>;

/// The I/O the channel needs from its environment.
#[async_trait::async_trait]
pub trait ChannelTransport: Send + Sync + 'static {
    /// Send one batch of commands.
    async fn send(&self, batch: &[ChannelCommand]) -> Result<()>;

    /// Open the event stream, resuming after `last_event_id` if given.
    async fn open_events(&self, last_event_id: Option<u64>) -> Result<EventStream>;

    /// Tell the ship to discard the channel.
    async fn close(&self) -> Result<()>;
}

/// reqwest-backed transport bound to one channel URL.
pub struct HttpTransport {
    url: Url,
    cookie: Option<String>,
    client: Client,
    /// No total timeout: the event stream stays open for the process lifetime.
    stream_client: Client,
}

impl HttpTransport {
    pub fn new(config: &ChannelConfig, uid: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| ChannelError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        let stream_client = Client::builder()
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| ChannelError::Network {
                message: format!("Failed to create event stream client: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            url: config.channel_url(uid)?,
            cookie: config.cookie_header(),
            client,
            stream_client,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn with_cookie(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.cookie {
            Some(cookie) => request.header(COOKIE, cookie),
            None => request,
        }
    }

    async fn check_status(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ChannelError::Http {
            url: self.url.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait::async_trait]
impl ChannelTransport for HttpTransport {
    async fn send(&self, batch: &[ChannelCommand]) -> Result<()> {
        let body = serde_json::to_vec(batch)?;
        let request = self
            .client
            .put(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        let response = self
            .with_cookie(request)
            .send()
            .await
            .map_err(|e| ChannelError::Network {
                message: format!("PUT {} failed: {}", self.url, e),
                source: Some(e),
            })?;

        let response = self.check_status(response).await?;
        debug!("PUT {} -> {}", self.url, response.status());
        Ok(())
    }

    async fn open_events(&self, last_event_id: Option<u64>) -> Result<EventStream> {
        let mut request = self
            .stream_client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = last_event_id {
            request = request.header("Last-Event-ID", id.to_string());
        }

        let response = self
            .with_cookie(request)
            .send()
            .await
            .map_err(|e| ChannelError::Network {
                message: format!("GET {} failed: {}", self.url, e),
                source: Some(e),
            })?;
        let response = self.check_status(response).await?;
        debug!("Event stream open on {}", self.url);

        Ok(decode_event_stream(response.bytes_stream()))
    }

    async fn close(&self) -> Result<()> {
        let response = self
            .with_cookie(self.client.delete(self.url.clone()))
            .send()
            .await?;
        self.check_status(response).await?;
        Ok(())
    }
}
