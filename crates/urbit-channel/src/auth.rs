//! Session cookie acquisition.
//!
//! A ship hands out its session cookie in exchange for the `+code` posted to
//! `/~/login`.

use crate::config::{ChannelConfig, NetworkConfig};
use crate::error::{ChannelError, Result};
use reqwest::header::SET_COOKIE;
use reqwest::redirect::Policy;
use tracing::{debug, info};

/// Log in with `code` and return the session cookies in `name=value` form.
pub async fn login(config: &ChannelConfig, code: &str) -> Result<Vec<String>> {
    let url = config.login_url()?;
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .user_agent(NetworkConfig::USER_AGENT)
        // The ship answers with a redirect that carries the cookie.
        .redirect(Policy::none())
        .build()?;

    debug!("Logging in at {}", url);
    let response = client
        .post(url.clone())
        .form(&[("password", code)])
        .send()
        .await
        .map_err(|e| ChannelError::Network {
            message: format!("Failed to reach {}: {}", url, e),
            source: Some(e),
        })?;

    let status = response.status();
    if !(status.is_success() || status.is_redirection()) {
        return Err(ChannelError::Auth {
            message: format!("{} answered {}", url, status),
        });
    }

    let cookies = session_cookies(
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok()),
    );
    if cookies.is_empty() {
        return Err(ChannelError::Auth {
            message: format!("{} returned no session cookie", url),
        });
    }

    info!("Logged in to {} ({} cookies)", url, cookies.len());
    Ok(cookies)
}

/// Keep the `name=value` part of each `Set-Cookie` header.
fn session_cookies<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<String> {
    headers
        .filter_map(|header| header.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .map(String::from)
        .collect()
}
