//! Urbit Channel - client for a ship's HTTP channel.
//!
//! A channel is one logical session with a ship: commands (pokes,
//! subscriptions, acknowledgments) are sent with `PUT`, results arrive
//! asynchronously on a Server-Sent Events stream for the same resource.
//!
//! # Example
//!
//! ```rust,ignore
//! use urbit_channel::{login, Channel, ChannelConfig, SubscriptionEvent};
//!
//! #[tokio::main]
//! async fn main() -> urbit_channel::Result<()> {
//!     let config = ChannelConfig::new("http://localhost", 8080);
//!     let cookies = login(&config, "lidlut-tabwed-pillex-ridrup").await?;
//!     let channel = Channel::new(&config.with_cookies(cookies))?;
//!
//!     let mut sub = channel.subscribe("zod", "language-server", "/primary").await?;
//!     channel.poke("zod", "hood", "helm-hi", "hello".into()).await?;
//!
//!     while let Some(SubscriptionEvent::Diff(json)) = sub.next().await {
//!         println!("{}", json);
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod retry;
pub mod transport;

pub use auth::login;
pub use channel::{Channel, ConnectionState, PendingPoke, SequenceState};
pub use command::{ChannelCommand, ServerFrame};
pub use config::{ChannelConfig, ChannelDefaults, NetworkConfig};
pub use error::{ChannelError, Result};
pub use events::{decode_event_stream, SseEvent};
pub use registry::{Subscription, SubscriptionEvent};
pub use retry::{retry_async, Backoff, RetryConfig};
pub use transport::{ChannelTransport, EventStream, HttpTransport};
