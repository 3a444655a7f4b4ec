//! Error types for the language server bridge.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use urbit_channel::ChannelError;

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors surfaced to the local client or logged by the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Request {method} got no answer within {timeout:?}")]
    RequestTimeout { method: String, timeout: Duration },

    /// JSON-RPC error returned by the ship's language server.
    #[error("{message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Subscription to the ship was lost")]
    SubscriptionLost,

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Message of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge { size: usize, limit: usize },

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
}

impl BridgeError {
    /// Error code reported to the client in a JSON-RPC error response.
    pub fn to_rpc_error_code(&self) -> i64 {
        match self {
            BridgeError::Remote { code, .. } => *code,

            BridgeError::Channel(ChannelError::PokeFailed { .. }) => -32001,

            BridgeError::Channel(ChannelError::ChannelClosed) | BridgeError::SubscriptionLost => {
                -32002
            }

            BridgeError::RequestTimeout { .. } => -32003,

            BridgeError::Channel(_) => -32000,

            BridgeError::Json { .. } => -32700,

            BridgeError::Protocol { .. } | BridgeError::MessageTooLarge { .. } => -32600,

            BridgeError::Io { .. } => -32603,
        }
    }

    /// Payload for the `data` member of an error response.
    pub fn rpc_data(&self) -> Option<Value> {
        match self {
            BridgeError::Remote { data, .. } => data.clone(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::RequestTimeout {
            method: "textDocument/hover".into(),
            timeout: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("textDocument/hover"));

        let err = BridgeError::Remote {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert_eq!(err.to_string(), "Method not found");
    }

    #[test]
    fn test_rpc_error_codes() {
        let remote = BridgeError::Remote {
            code: -32601,
            message: "Method not found".into(),
            data: Some(serde_json::json!({"method": "foo"})),
        };
        assert_eq!(remote.to_rpc_error_code(), -32601);
        assert_eq!(remote.rpc_data(), Some(serde_json::json!({"method": "foo"})));

        let poke = BridgeError::Channel(ChannelError::PokeFailed {
            id: 3,
            message: "bad mark".into(),
        });
        assert_eq!(poke.to_rpc_error_code(), -32001);
        assert_eq!(
            BridgeError::Channel(ChannelError::ChannelClosed).to_rpc_error_code(),
            -32002
        );
        assert_eq!(
            BridgeError::RequestTimeout {
                method: "x".into(),
                timeout: Duration::from_secs(1)
            }
            .to_rpc_error_code(),
            -32003
        );
        assert_eq!(
            BridgeError::Protocol {
                message: "missing header".into()
            }
            .to_rpc_error_code(),
            -32600
        );
    }

    #[test]
    fn test_from_serde_json() {
        let err: BridgeError = serde_json::from_str::<Value>("{").unwrap_err().into();
        assert_eq!(err.to_rpc_error_code(), -32700);
    }
}
