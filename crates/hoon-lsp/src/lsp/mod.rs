//! The local side: LSP base protocol over a byte stream.

pub mod connection;
pub mod framing;
pub mod message;

pub use connection::{LspConnection, MessageHandler, Outbound, Responder};
pub use message::{Message, Notification, Request, Response, ResponseError};
