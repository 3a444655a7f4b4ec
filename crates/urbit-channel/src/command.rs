//! Wire format of the channel.
//!
//! Outgoing commands are PUT as a JSON array; incoming frames arrive as the
//! `data` of SSE events.
//!
//! ```text
//! PUT  [{"id":1,"action":"poke","ship":"zod","app":"a","mark":"m","json":{..}},
//!       {"action":"ack","event-id":7}]
//! SSE  {"response":"poke","id":1,"ok":"ok"}
//!      {"response":"diff","id":2,"json":{..}}
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A command sent to the ship inside a channel PUT batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ChannelCommand {
    Poke {
        id: u64,
        ship: String,
        app: String,
        mark: String,
        json: Value,
    },
    Subscribe {
        id: u64,
        ship: String,
        app: String,
        path: String,
    },
    Unsubscribe {
        id: u64,
        subscription: u64,
    },
    Ack {
        #[serde(rename = "event-id")]
        event_id: u64,
    },
}

impl ChannelCommand {
    /// Command id, absent for acknowledgments.
    pub fn id(&self) -> Option<u64> {
        match self {
            ChannelCommand::Poke { id, .. }
            | ChannelCommand::Subscribe { id, .. }
            | ChannelCommand::Unsubscribe { id, .. } => Some(*id),
            ChannelCommand::Ack { .. } => None,
        }
    }
}

/// A frame pushed by the ship on the channel's event stream.
///
/// `ok` and `err` record whether the key was present: `"ok": null` is
/// `Some(Value::Null)`, a missing key is `None`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "response", rename_all = "lowercase")]
pub enum ServerFrame {
    Poke {
        id: u64,
        #[serde(default, deserialize_with = "present")]
        ok: Option<Value>,
        #[serde(default, deserialize_with = "present")]
        err: Option<Value>,
    },
    Subscribe {
        id: u64,
        #[serde(default, deserialize_with = "present")]
        ok: Option<Value>,
        #[serde(default, deserialize_with = "present")]
        err: Option<Value>,
    },
    Diff {
        id: u64,
        #[serde(default)]
        json: Value,
    },
    Quit {
        id: u64,
    },
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Render an `err` payload (usually a rendered tang string) as text.
pub fn error_text(err: &Value) -> String {
    match err {
        Value::String(s) => s.clone(),
        Value::Array(lines) if lines.iter().all(Value::is_string) => lines
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}
