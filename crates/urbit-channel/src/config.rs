//! Centralized configuration for the channel client.
//!
//! Constant holders for defaults and timeouts, plus [`ChannelConfig`] which
//! describes how to reach one ship.

use crate::error::{ChannelError, Result};
use crate::retry::RetryConfig;
use std::time::Duration;
use url::Url;

/// Defaults for reaching a ship.
pub struct ChannelDefaults;

impl ChannelDefaults {
    pub const BASE_URL: &'static str = "http://localhost";
    pub const PORT: u16 = 8080;
    pub const SHIP: &'static str = "zod";
    /// Login code of a development (fake) `~zod`.
    pub const FAKE_ZOD_CODE: &'static str = "lidlut-tabwed-pillex-ridrup";
    pub const CHANNEL_PATH: &'static str = "/~/channel/";
    pub const LOGIN_PATH: &'static str = "/~/login";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const USER_AGENT: &'static str = "hoon-language-server";
    pub const RECONNECT_MAX_ATTEMPTS: u32 = 10;
    pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(500);
    pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);
}

/// Everything the channel needs to talk to one ship.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Scheme and host of the ship, without port (e.g. `http://localhost`).
    pub base_url: String,
    /// HTTP port of the running ship.
    pub port: u16,
    /// Session cookies obtained from login, `name=value` form.
    pub cookies: Vec<String>,
    /// Backoff policy for reconnecting the event stream.
    pub reconnect: RetryConfig,
    /// Timeout for each PUT.
    pub request_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_url: ChannelDefaults::BASE_URL.to_string(),
            port: ChannelDefaults::PORT,
            cookies: Vec::new(),
            reconnect: RetryConfig::new()
                .with_max_attempts(NetworkConfig::RECONNECT_MAX_ATTEMPTS)
                .with_base_delay(NetworkConfig::RECONNECT_BASE_DELAY)
                .with_max_delay(NetworkConfig::RECONNECT_MAX_DELAY),
            request_timeout: NetworkConfig::REQUEST_TIMEOUT,
        }
    }
}

impl ChannelConfig {
    pub fn new(base_url: impl Into<String>, port: u16) -> Self {
        Self {
            base_url: base_url.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_cookies(mut self, cookies: Vec<String>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Root URL of the ship including the port, without trailing slash.
    pub fn origin(&self) -> Result<Url> {
        let mut url = Url::parse(self.base_url.trim_end_matches('/'))?;
        if url.cannot_be_a_base() {
            return Err(ChannelError::Config {
                message: format!("ship URL {} cannot carry a path", self.base_url),
            });
        }
        url.set_port(Some(self.port)).map_err(|_| ChannelError::Config {
            message: format!("ship URL {} cannot carry a port", self.base_url),
        })?;
        Ok(url)
    }

    /// URL of the channel resource for `uid`.
    pub fn channel_url(&self, uid: &str) -> Result<Url> {
        Ok(self
            .origin()?
            .join(&format!("{}{}", ChannelDefaults::CHANNEL_PATH, uid))?)
    }

    /// URL of the login endpoint.
    pub fn login_url(&self) -> Result<Url> {
        Ok(self.origin()?.join(ChannelDefaults::LOGIN_PATH)?)
    }

    /// Value for the `Cookie` header, if any cookies are set.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            None
        } else {
            Some(self.cookies.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_url_includes_port_and_uid() {
        let config = ChannelConfig::new("http://localhost", 8080);
        let url = config.channel_url("1700000000000-abc123").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/~/channel/1700000000000-abc123"
        );
    }

    #[test]
    fn test_trailing_slash_is_ignored() {
        let config = ChannelConfig::new("http://127.0.0.1/", 12321);
        assert_eq!(
            config.login_url().unwrap().as_str(),
            "http://127.0.0.1:12321/~/login"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let config = ChannelConfig::new("not a url", 80);
        assert!(matches!(
            config.channel_url("x"),
            Err(ChannelError::Config { .. })
        ));
    }

    #[test]
    fn test_cookie_header() {
        let config = ChannelConfig::default();
        assert!(config.cookie_header().is_none());

        let config = config.with_cookies(vec![
            "urbauth-~zod=0v1.abc".to_string(),
            "other=1".to_string(),
        ]);
        assert_eq!(
            config.cookie_header().as_deref(),
            Some("urbauth-~zod=0v1.abc; other=1")
        );
    }
}
