//! The handshake answer.

use serde_json::{json, Value};

/// Characters after which the client should ask for completions.
const TRIGGER_CHARACTERS: &[&str] = &[
    "-", "+", "^", "!", "@", "$", "%", ".", "&", "*", "/", ",", ">", "<", "~", "|", "=", ";",
    ":", "_",
];

/// `TextDocumentSyncKind.Incremental`
const SYNC_INCREMENTAL: u8 = 2;

/// Result of the `initialize` request.
pub fn initialize_result() -> Value {
    json!({
        "capabilities": {
            "hoverProvider": true,
            "definitionProvider": true,
            "completionProvider": {
                "resolveProvider": false,
                "triggerCharacters": TRIGGER_CHARACTERS,
            },
            "textDocumentSync": {
                "openClose": true,
                "change": SYNC_INCREMENTAL,
                "willSave": true,
                "save": true,
            },
            "workspace": {
                "workspaceFolders": {
                    "supported": true,
                    "changeNotifications": true,
                },
            },
        },
        "serverInfo": {
            "name": "hoon-language-server",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}
