//! Bridge configuration and protocol constants.

use std::time::Duration;
use urbit_channel::RetryConfig;

/// Marks the ship's language-server agent accepts.
pub struct Marks;

impl Marks {
    /// Mark for forwarded requests that expect an answer.
    pub const REQUEST: &'static str = "language-server-rpc-request";
    /// Mark for forwarded notifications.
    pub const NOTIFICATION: &'static str = "language-server-rpc-notification";
}

/// Method names the bridge treats specially.
pub struct Methods;

impl Methods {
    /// Answered locally with the capability document.
    pub const INITIALIZE: &'static str = "initialize";
    /// Forwarded twice; the ship's build of the saved file may lag the first copy.
    pub const DID_SAVE: &'static str = "textDocument/didSave";
    /// Stops the listen loop after forwarding.
    pub const EXIT: &'static str = "exit";
}

/// Default values for bridge settings.
pub struct BridgeDefaults;

impl BridgeDefaults {
    pub const APP: &'static str = "language-server";
    pub const PATH: &'static str = "/primary";
    pub const NOTIFICATION_DELAY: Duration = Duration::from_millis(1000);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const LOG_FILE: &'static str = "/tmp/hoon-language-server.log";
    /// Largest LSP message body accepted on stdin.
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
    pub const RESUBSCRIBE_MAX_ATTEMPTS: u32 = 8;
    pub const RESUBSCRIBE_BASE_DELAY: Duration = Duration::from_secs(1);
    pub const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(60);
}

/// Settings for [`crate::Bridge`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub ship: String,
    pub app: String,
    pub path: String,
    /// Delay before the second copy of a re-delivered notification.
    pub notification_delay: Duration,
    /// Notification method that is forwarded twice.
    pub redelivered_method: String,
    /// How long a forwarded request waits for the ship's answer.
    pub request_timeout: Duration,
    /// Backoff between attempts to re-open the subscription.
    pub resubscribe: RetryConfig,
}

impl BridgeConfig {
    pub fn new(ship: impl Into<String>) -> Self {
        Self {
            ship: ship.into(),
            app: BridgeDefaults::APP.to_string(),
            path: BridgeDefaults::PATH.to_string(),
            notification_delay: BridgeDefaults::NOTIFICATION_DELAY,
            redelivered_method: Methods::DID_SAVE.to_string(),
            request_timeout: BridgeDefaults::REQUEST_TIMEOUT,
            resubscribe: RetryConfig::new()
                .with_max_attempts(BridgeDefaults::RESUBSCRIBE_MAX_ATTEMPTS)
                .with_base_delay(BridgeDefaults::RESUBSCRIBE_BASE_DELAY)
                .with_max_delay(BridgeDefaults::RESUBSCRIBE_MAX_DELAY),
        }
    }

    pub fn with_notification_delay(mut self, delay: Duration) -> Self {
        self.notification_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_resubscribe(mut self, policy: RetryConfig) -> Self {
        self.resubscribe = policy;
        self
    }
}
