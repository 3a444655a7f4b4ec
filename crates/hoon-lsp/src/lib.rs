//! Hoon Language Server - bridges an editor's LSP client to a ship.
//!
//! The editor talks LSP over stdio; the ship's `language-server` agent is
//! reached through an [`urbit_channel::Channel`]. [`Bridge`] forwards the
//! editor's messages as pokes and routes the agent's subscription updates
//! back as responses and notifications.

pub mod bridge;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod lsp;

pub use bridge::{Bridge, ForwardedRequest};
pub use config::{BridgeConfig, BridgeDefaults, Marks, Methods};
pub use error::{BridgeError, Result};
pub use lsp::{LspConnection, MessageHandler, Outbound};
