//! Session token resolution.
//!
//! TikTok sets the identifiers needed to authorize captcha requests
//! asynchronously via client-side script after the initial page load, so a
//! one-shot read is racy. Each token is resolved by a bounded poll over the
//! session's cookie/storage snapshots.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::config::{Config, MS_TOKEN_COOKIE, VERIFY_FP_COOKIE};
use crate::error::AcquireError;
use crate::session::{BrowserSession, Cookie};

/// Identifiers required to authorize challenge requests.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub device_id: u64,
    pub verify_fp: String,
    pub ms_token: String,
}

/// Resolve all three session tokens, each with its own poll.
pub async fn resolve(
    session: &dyn BrowserSession,
    config: &Config,
) -> Result<SessionTokens, AcquireError> {
    let verify_fp = await_cookie(
        session,
        VERIFY_FP_COOKIE,
        false,
        config.token_timeout,
        config.token_poll_interval,
    )
    .await?;
    let device_id = await_device_id(
        session,
        &config.device_id_storage_key,
        config.token_timeout,
        config.token_poll_interval,
    )
    .await?;
    let ms_token = await_cookie(
        session,
        MS_TOKEN_COOKIE,
        true,
        config.token_timeout,
        config.token_poll_interval,
    )
    .await?;

    debug!(device_id, "session tokens resolved");
    Ok(SessionTokens {
        device_id,
        verify_fp,
        ms_token,
    })
}

/// Poll the cookie snapshot until `name` appears, or fail with
/// [`AcquireError::TokenTimeout`] once `timeout` elapses.
pub async fn await_cookie(
    session: &dyn BrowserSession,
    name: &str,
    require_secure: bool,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<String, AcquireError> {
    let start = tokio::time::Instant::now();
    loop {
        let cookies = session.cookies().await?;
        if let Some(value) = cookie_value(&cookies, name, require_secure) {
            return Ok(value);
        }

        if start.elapsed() >= timeout {
            return Err(AcquireError::TokenTimeout {
                name: name.to_string(),
                waited_ms: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Poll localStorage until an entry whose key contains `key_marker` holds a
/// JSON blob with a numeric `user_unique_id`, and return it.
pub async fn await_device_id(
    session: &dyn BrowserSession,
    key_marker: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<u64, AcquireError> {
    let start = tokio::time::Instant::now();
    loop {
        let entries = session.local_storage().await?;
        for entry in &entries {
            if !entry.name.contains(key_marker) {
                continue;
            }
            if let Some(device_id) = extract_device_id(&entry.value) {
                return Ok(device_id);
            }
        }

        if start.elapsed() >= timeout {
            return Err(AcquireError::TokenTimeout {
                name: key_marker.to_string(),
                waited_ms: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// One-shot scan for the secure `msToken` cookie.
#[must_use]
pub fn ms_token(cookies: &[Cookie]) -> Option<String> {
    cookie_value(cookies, MS_TOKEN_COOKIE, true)
}

fn cookie_value(cookies: &[Cookie], name: &str, require_secure: bool) -> Option<String> {
    cookies
        .iter()
        .find(|c| c.name == name && (!require_secure || c.secure))
        .map(|c| c.value.clone())
}

/// The device id is nested inside a JSON-encoded string value:
/// `{"tokens": ..., "user_unique_id": "7123456789"}`.
fn extract_device_id(raw: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(raw).ok()?;
    match value.get("user_unique_id")? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}
