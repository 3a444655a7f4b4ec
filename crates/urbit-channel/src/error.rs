//! Error types for the channel client.
//!
//! Transport failures, host-reported poke/subscribe failures and local
//! teardown all surface through [`ChannelError`].

use thiserror::Error;

/// Main error type for channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    // Transport errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("HTTP {status} from {url}: {body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Event stream error: {message}")]
    EventStream { message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Host-reported failures
    #[error("Poke {id} failed: {message}")]
    PokeFailed { id: u64, message: String },

    #[error("Invalid {kind} response for {id}")]
    InvalidResponse { kind: &'static str, id: u64 },

    // Lifecycle
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Login failed: {message}")]
    Auth { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        ChannelError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChannelError::Timeout(std::time::Duration::from_secs(0))
        } else {
            ChannelError::Network {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl From<url::ParseError> for ChannelError {
    fn from(err: url::ParseError) -> Self {
        ChannelError::Config {
            message: format!("invalid ship URL: {}", err),
        }
    }
}

impl ChannelError {
    /// Check if this error should trigger a reconnect or retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChannelError::Network { .. }
            | ChannelError::Timeout(_)
            | ChannelError::EventStream { .. } => true,
            ChannelError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
